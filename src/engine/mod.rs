// src/engine/mod.rs

//! End-to-end orchestration of one run.
//!
//! A run goes through the same fixed pipeline every time:
//! - build the full dependency closure of the roots,
//! - mark stale nodes,
//! - prune fresh nodes and redundant edges,
//! - drain what is left through the scheduler.
//!
//! [`plan`] stops after the third step, which is what `--dry-run` shows.

pub mod summary;

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use serde::Serialize;
use tracing::info;

use crate::dag::{
    self, analyze, GraphBuilder, ReductionReport, Scheduler, SchedulerOptions, StalenessReport,
    TaskGraph,
};
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::progress::{NoProgress, ProgressReporter, TerminalProgress};
use crate::task::TaskNode;

pub use summary::{GenerationSnapshot, RunSummary};

/// Caller-facing options of [`build_and_run`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Treat sources newer than a cached result as a reason to re-run.
    pub detect_source_change: bool,
    pub rate_limits: HashMap<String, usize>,
    pub prefix_commands: HashMap<String, String>,
    pub show_progress: bool,
    pub dump_graphs: bool,
    pub interactive: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            detect_source_change: true,
            rate_limits: HashMap::new(),
            prefix_commands: HashMap::new(),
            show_progress: false,
            dump_graphs: false,
            interactive: false,
        }
    }
}

impl RunOptions {
    fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            rate_limits: self.rate_limits.clone(),
            prefix_commands: self.prefix_commands.clone(),
            interactive: self.interactive,
            dump_graphs: self.dump_graphs,
        }
    }
}

/// One node of a [`Plan`], for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub task: String,
    pub channel: String,
    pub after: Vec<String>,
}

/// The reduced graph of a run, before anything executed.
#[derive(Debug)]
pub struct Plan {
    pub graph: TaskGraph,
    pub staleness: StalenessReport,
    pub reduction: ReductionReport,
}

impl Plan {
    /// Nodes in a valid execution order, each with its remaining
    /// (non-redundant) prerequisites.
    pub fn steps(&self) -> Result<Vec<PlanStep>> {
        let order = toposort(self.graph.inner(), None)
            .map_err(|cycle| self.graph.cycle_error(cycle.node_id()))?;

        Ok(order
            .into_iter()
            .filter_map(|idx| {
                let node = self.graph.node(idx)?;
                let mut after: Vec<String> = self
                    .graph
                    .predecessors(idx)
                    .filter_map(|p| self.graph.node(p).map(|n| n.identity.to_string()))
                    .collect();
                after.sort();
                Some(PlanStep {
                    task: node.identity.to_string(),
                    channel: node.labels.to_string(),
                    after,
                })
            })
            .collect())
    }
}

/// Build, analyze and reduce the graph of `roots` without running anything.
pub fn plan(
    roots: impl IntoIterator<Item = Arc<dyn TaskNode>>,
    detect_source_change: bool,
) -> Result<Plan> {
    let mut graph = GraphBuilder::new().add_roots(roots).build()?;
    let staleness = analyze(&mut graph, detect_source_change)?;
    info!(
        total = staleness.total,
        stale = staleness.stale,
        "staleness analysis complete"
    );

    let reduction = dag::reduce(&mut graph)?;
    info!(
        remaining = graph.node_count(),
        pruned = reduction.pruned_nodes,
        redundant_edges = reduction.redundant_edges,
        "graph reduced"
    );

    Ok(Plan {
        graph,
        staleness,
        reduction,
    })
}

/// Bring `roots` up to date.
///
/// Shows terminal progress bars when `options.show_progress` is set.
pub async fn build_and_run<E>(
    roots: impl IntoIterator<Item = Arc<dyn TaskNode>>,
    executor: &mut E,
    options: &RunOptions,
) -> Result<RunSummary>
where
    E: ExecutorBackend + ?Sized,
{
    if options.show_progress {
        let mut reporter = TerminalProgress::new();
        build_and_run_with_reporter(roots, executor, options, &mut reporter).await
    } else {
        build_and_run_with_reporter(roots, executor, options, &mut NoProgress).await
    }
}

/// Like [`build_and_run`], reporting progress to a caller-supplied sink.
pub async fn build_and_run_with_reporter<E>(
    roots: impl IntoIterator<Item = Arc<dyn TaskNode>>,
    executor: &mut E,
    options: &RunOptions,
    reporter: &mut dyn ProgressReporter,
) -> Result<RunSummary>
where
    E: ExecutorBackend + ?Sized,
{
    let plan = plan(roots, options.detect_source_change)?;
    let scheduler = Scheduler::new(plan.graph, options.scheduler_options())?;
    let report = scheduler.run(executor, reporter).await?;

    Ok(RunSummary {
        total_nodes: plan.staleness.total,
        stale_nodes: plan.staleness.stale,
        redundant_edges: plan.reduction.redundant_edges,
        scheduled_by_kind: report.scheduled_by_kind,
        completed: report.completed,
        generations: report.generations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::testing::{LoopTask, StubTask};
    use crate::errors::StaledagError;
    use crate::exec::LocalExecutor;

    #[test]
    fn plan_of_fresh_graph_is_empty() {
        let a = StubTask::new("a").arc();
        let b = StubTask::new("b").after(&a).arc();

        let plan = plan([b], true).unwrap();

        assert_eq!(plan.staleness.total, 2);
        assert_eq!(plan.staleness.stale, 0);
        assert!(plan.graph.is_empty());
        assert!(plan.steps().unwrap().is_empty());
    }

    #[test]
    fn plan_steps_follow_dependency_order() {
        let a = StubTask::new("a").cached(None).arc();
        let b = StubTask::new("b").after(&a).arc();
        let c = StubTask::new("c").after(&a).after(&b).arc();

        let steps = plan([c], true).unwrap().steps().unwrap();

        let names: Vec<&str> = steps.iter().map(|s| s.task.as_str()).collect();
        assert_eq!(names, vec!["stub[a]", "stub[b]", "stub[c]"]);
        // a -> c is implied by a -> b -> c
        assert_eq!(steps[2].after, vec!["stub[b]".to_string()]);
    }

    #[test]
    fn plan_reports_looping_prerequisites() {
        let (a, _b) = LoopTask::pair("x", "y");
        let err = plan([a as Arc<dyn TaskNode>], true).unwrap_err();
        assert!(matches!(err, StaledagError::DagCycle(_)));
    }

    #[tokio::test]
    async fn summary_counts_scheduled_nodes() {
        let a = StubTask::new("a").arc();
        let b = StubTask::new("b").cached(None).after(&a).arc();

        let summary = build_and_run([b], &mut LocalExecutor::new(), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.total_nodes, 2);
        assert_eq!(summary.stale_nodes, 1);
        assert_eq!(summary.scheduled(), 1);
        assert_eq!(summary.completed, 1);
        assert!(summary.generations.is_empty());
    }
}
