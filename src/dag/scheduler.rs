// src/dag/scheduler.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, error, info, warn};

use crate::dag::channels::{group_by_labels, ChannelGroups};
use crate::dag::graph::TaskGraph;
use crate::engine::GenerationSnapshot;
use crate::errors::{Result, StaledagError};
use crate::exec::{Completion, ExecutorBackend, Ticket, WorkUnit};
use crate::progress::ProgressReporter;
use crate::task::{Identity, Labels};

/// Knobs for one scheduling run.
#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// Channel name -> maximum number of concurrently running nodes.
    /// Channels without an entry are unbounded.
    pub rate_limits: HashMap<String, usize>,
    /// Channel name -> command prepended to the task's own command.
    pub prefix_commands: HashMap<String, String>,
    pub interactive: bool,
    /// Record a remaining-nodes snapshot after every batch of completions.
    pub dump_graphs: bool,
}

/// What the scheduler did during a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    /// Nodes handed to the scheduler, per task kind.
    pub scheduled_by_kind: BTreeMap<String, usize>,
    pub completed: usize,
    pub generations: Vec<GenerationSnapshot>,
}

#[derive(Debug)]
struct FirstFailure {
    identity: Identity,
    description: String,
    source: anyhow::Error,
}

/// Drains a reduced [`TaskGraph`] through an executor backend.
///
/// The scheduler owns the graph for the whole run. Nodes move from the
/// graph into the frontier once all their prerequisites have completed,
/// from the frontier to the executor when every rate-limited channel they
/// belong to has room, and are removed from the graph when they succeed.
///
/// `run` is the only async entry point and `wait_any` is its only
/// suspension point, so all bookkeeping happens on one task without locks.
#[derive(Debug)]
pub struct Scheduler {
    graph: TaskGraph,
    options: SchedulerOptions,
    frontier: ChannelGroups,
    occupied: HashMap<String, usize>,
    in_flight: HashMap<Ticket, NodeIndex>,
    failure: Option<FirstFailure>,
    completed: usize,
    generations: Vec<GenerationSnapshot>,
}

impl Scheduler {
    /// Rejects zero budgets, which could never make progress.
    pub fn new(graph: TaskGraph, options: SchedulerOptions) -> Result<Self> {
        if let Some((channel, _)) = options.rate_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(StaledagError::ConfigError(format!(
                "rate limit for channel '{channel}' must be at least 1"
            )));
        }

        Ok(Self {
            graph,
            options,
            frontier: ChannelGroups::new(),
            occupied: HashMap::new(),
            in_flight: HashMap::new(),
            failure: None,
            completed: 0,
            generations: Vec::new(),
        })
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Execute every node of the graph, honouring dependency order and
    /// channel budgets.
    ///
    /// On the first task failure no further nodes are submitted; work that
    /// is already running is waited for, and then the failure is returned.
    pub async fn run<E>(
        mut self,
        executor: &mut E,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<ScheduleReport>
    where
        E: ExecutorBackend + ?Sized,
    {
        let scheduled_by_kind = self.graph.count_by_kind();
        for (labels, queue) in group_by_labels(self.graph.node_indices(), &self.graph).iter() {
            reporter.register(&labels.to_string(), queue.len() as u64);
        }

        let outcome = self.drive(executor, reporter).await;
        reporter.finish();
        outcome?;

        if let Some(failure) = self.failure.take() {
            return Err(StaledagError::TaskFailed {
                identity: failure.identity,
                description: failure.description,
                source: failure.source,
                generations: std::mem::take(&mut self.generations),
            });
        }

        if !self.frontier.is_empty() || !self.graph.is_empty() {
            return Err(StaledagError::Invariant(format!(
                "run ended with {} queued and {} unfinished nodes",
                self.frontier.len(),
                self.graph.node_count()
            )));
        }

        info!(completed = self.completed, "all scheduled tasks completed");
        Ok(ScheduleReport {
            scheduled_by_kind,
            completed: self.completed,
            generations: self.generations,
        })
    }

    async fn drive<E>(&mut self, executor: &mut E, reporter: &mut dyn ProgressReporter) -> Result<()>
    where
        E: ExecutorBackend + ?Sized,
    {
        self.frontier = group_by_labels(self.graph.ready_nodes(), &self.graph);
        self.record_generation();

        loop {
            self.submit_ready(executor)?;

            if self.in_flight.is_empty() {
                return Ok(());
            }

            let completions = executor.wait_any().await?;
            let mut unlocked = Vec::new();
            for completion in completions {
                unlocked.extend(self.handle_completion(completion, reporter)?);
            }

            let unlocked = group_by_labels(unlocked, &self.graph);
            self.frontier.merge(unlocked);
            self.record_generation();
        }
    }

    /// Submit as much of the frontier as the channel budgets allow.
    fn submit_ready<E>(&mut self, executor: &mut E) -> Result<()>
    where
        E: ExecutorBackend + ?Sized,
    {
        if self.failure.is_some() {
            return Ok(());
        }

        let mut frontier = std::mem::take(&mut self.frontier);
        for (labels, queue) in frontier.iter_mut() {
            while let Some(&idx) = queue.front() {
                if !self.has_capacity(labels) {
                    debug!(channel = %labels, waiting = queue.len(), "channel at capacity");
                    break;
                }
                queue.pop_front();
                self.submit_one(executor, idx, labels)?;
            }
        }
        frontier.compact();
        self.frontier = frontier;
        Ok(())
    }

    fn has_capacity(&self, labels: &Labels) -> bool {
        labels.iter().all(|channel| match self.options.rate_limits.get(channel) {
            Some(&limit) => self.occupied.get(channel).copied().unwrap_or(0) < limit,
            None => true,
        })
    }

    fn submit_one<E>(&mut self, executor: &mut E, idx: NodeIndex, labels: &Labels) -> Result<()>
    where
        E: ExecutorBackend + ?Sized,
    {
        let node = self
            .graph
            .node(idx)
            .ok_or_else(|| StaledagError::Invariant(format!("queued node {idx:?} is not in the graph")))?;
        let identity = node.identity.clone();
        let task = Arc::clone(&node.task);

        let pending = self.graph.in_degree(idx);
        if pending != 0 {
            return Err(StaledagError::Invariant(format!(
                "{identity} submitted with {pending} unfinished prerequisites"
            )));
        }

        let prefix_command = self.prefix_for(labels, &identity);
        for channel in labels.iter() {
            if self.options.rate_limits.contains_key(channel) {
                *self.occupied.entry(channel.to_string()).or_insert(0) += 1;
            }
        }

        let ticket = executor.submit(WorkUnit {
            task,
            prefix_command,
            interactive: self.options.interactive,
        })?;
        debug!(task = %identity, channel = %labels, ticket, "task submitted");
        self.in_flight.insert(ticket, idx);
        Ok(())
    }

    /// Prefix command of the first channel, in label order, that has one.
    fn prefix_for(&self, labels: &Labels, identity: &Identity) -> Option<String> {
        let mut matches = labels
            .iter()
            .filter_map(|channel| self.options.prefix_commands.get(channel).map(|p| (channel, p)));

        let (channel, prefix) = matches.next()?;
        let ignored: Vec<&str> = matches.map(|(c, _)| c).collect();
        if !ignored.is_empty() {
            info!(
                task = %identity,
                chosen = channel,
                ?ignored,
                "several channels define a prefix command; using the first"
            );
        }
        Some(prefix.clone())
    }

    fn release(&mut self, labels: &Labels) {
        for channel in labels.iter() {
            if let Some(n) = self.occupied.get_mut(channel) {
                *n = n.saturating_sub(1);
            }
        }
    }

    /// Apply one completion; returns dependents that just became ready.
    fn handle_completion(
        &mut self,
        completion: Completion,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<Vec<NodeIndex>> {
        let Completion { ticket, outcome } = completion;
        let idx = self
            .in_flight
            .remove(&ticket)
            .ok_or_else(|| StaledagError::Invariant(format!("completion for unknown ticket {ticket}")))?;
        let node = self
            .graph
            .node(idx)
            .ok_or_else(|| StaledagError::Invariant(format!("running node {idx:?} is not in the graph")))?;
        let identity = node.identity.clone();
        let labels = node.labels.clone();
        let task = Arc::clone(&node.task);

        self.release(&labels);

        match outcome {
            Ok(()) => {
                info!(task = %identity, channel = %labels, "task completed");
                self.completed += 1;
                reporter.advance(&labels.to_string());
                Ok(self.graph.complete(idx))
            }
            Err(source) => {
                error!(task = %identity, error = %format!("{source:#}"), "task failed");
                if self.failure.is_none() {
                    if !self.in_flight.is_empty() {
                        warn!(
                            running = self.in_flight.len(),
                            "not submitting further tasks; waiting for running ones"
                        );
                    }
                    self.failure = Some(FirstFailure {
                        identity,
                        description: task.describe_error(),
                        source,
                    });
                } else {
                    warn!(task = %identity, "additional failure while draining");
                }
                Ok(Vec::new())
            }
        }
    }

    fn record_generation(&mut self) {
        if !self.options.dump_graphs {
            return;
        }
        let snapshot = GenerationSnapshot {
            generation: self.generations.len(),
            remaining_by_kind: self.graph.count_by_kind(),
            queued: self.frontier.len(),
            in_flight: self.in_flight.len(),
            completed: self.completed,
        };
        debug!(?snapshot, "generation snapshot");
        self.generations.push(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::testing::StubTask;
    use crate::exec::LocalExecutor;
    use crate::progress::NoProgress;

    fn options() -> SchedulerOptions {
        SchedulerOptions::default()
    }

    #[test]
    fn zero_budget_is_rejected() {
        let mut opts = options();
        opts.rate_limits.insert("gpu".into(), 0);
        let err = Scheduler::new(TaskGraph::new(), opts).unwrap_err();
        assert!(matches!(err, StaledagError::ConfigError(_)));
    }

    #[test]
    fn first_labelled_prefix_wins() {
        let mut opts = options();
        opts.prefix_commands.insert("net".into(), "proxychains".into());
        opts.prefix_commands.insert("gpu".into(), "nice".into());
        let sched = Scheduler::new(TaskGraph::new(), opts).unwrap();
        let id = Identity::new("stub", "x");

        assert_eq!(
            sched.prefix_for(&Labels::new(["gpu", "net"]), &id).as_deref(),
            Some("nice")
        );
        assert_eq!(
            sched.prefix_for(&Labels::new(["cpu", "net"]), &id).as_deref(),
            Some("proxychains")
        );
        assert_eq!(sched.prefix_for(&Labels::new(["cpu"]), &id), None);
    }

    #[test]
    fn capacity_checks_every_budgeted_channel() {
        let mut opts = options();
        opts.rate_limits.insert("gpu".into(), 1);
        opts.rate_limits.insert("net".into(), 2);
        let mut sched = Scheduler::new(TaskGraph::new(), opts).unwrap();
        let both = Labels::new(["gpu", "net"]);

        assert!(sched.has_capacity(&both));
        sched.occupied.insert("gpu".into(), 1);
        assert!(!sched.has_capacity(&both));
        assert!(sched.has_capacity(&Labels::new(["net", "cpu"])));
    }

    #[tokio::test]
    async fn empty_graph_completes_immediately() {
        let sched = Scheduler::new(TaskGraph::new(), options()).unwrap();
        let report = sched.run(&mut LocalExecutor::new(), &mut NoProgress).await.unwrap();
        assert_eq!(report.completed, 0);
        assert!(report.scheduled_by_kind.is_empty());
    }

    #[tokio::test]
    async fn chain_runs_to_completion_with_snapshots() {
        let a = StubTask::new("a").arc();
        let b = StubTask::new("b").after(&a).arc();
        let c = StubTask::new("c").after(&b).arc();
        let mut g = TaskGraph::new();
        let (ia, ib, ic) = (g.insert(a), g.insert(b), g.insert(c));
        g.add_dependency(ia, ib);
        g.add_dependency(ib, ic);

        let mut opts = options();
        opts.dump_graphs = true;
        let sched = Scheduler::new(g, opts).unwrap();
        let report = sched.run(&mut LocalExecutor::new(), &mut NoProgress).await.unwrap();

        assert_eq!(report.completed, 3);
        assert_eq!(report.scheduled_by_kind.get("stub"), Some(&3));
        assert_eq!(report.generations.len(), 4);
        assert_eq!(report.generations[0].remaining_by_kind.get("stub"), Some(&3));
        assert!(report.generations[3].remaining_by_kind.is_empty());
    }
}
