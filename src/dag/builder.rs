// src/dag/builder.rs

//! Full dependency closure of one or more root tasks.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::dag::graph::TaskGraph;
use crate::errors::{Result, StaledagError};
use crate::task::{Identity, TaskNode};

/// Walks prerequisites from a set of roots into a [`TaskGraph`].
///
/// The walk uses an explicit work stack, so arbitrarily deep chains do not
/// grow the call stack. Each identity is expanded once; its timestamps are
/// snapshotted the first time it is seen and never re-read during the run.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    roots: Vec<Arc<dyn TaskNode>>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_root(mut self, task: Arc<dyn TaskNode>) -> Self {
        self.roots.push(task);
        self
    }

    pub fn add_roots(mut self, tasks: impl IntoIterator<Item = Arc<dyn TaskNode>>) -> Self {
        self.roots.extend(tasks);
        self
    }

    pub fn build(self) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        let mut expanded: HashSet<Identity> = HashSet::new();
        let mut stack: Vec<Arc<dyn TaskNode>> = self.roots;

        while let Some(task) = stack.pop() {
            let identity = task.identity();
            if expanded.contains(&identity) {
                continue;
            }

            let prereqs = task
                .prerequisites()
                .map_err(|source| StaledagError::Build {
                    identity: identity.clone(),
                    source,
                })?;

            let idx = graph.insert(task);
            expanded.insert(identity.clone());
            trace!(task = %identity, prerequisites = prereqs.len(), "expanding node");

            for (role, prereq) in prereqs {
                let prereq_id = prereq.identity();
                let prereq_idx = graph.insert(Arc::clone(&prereq));
                graph.add_dependency(prereq_idx, idx);
                trace!(task = %identity, role = %role, prerequisite = %prereq_id, "edge");

                if !expanded.contains(&prereq_id) {
                    stack.push(prereq);
                }
            }
        }

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "built full dependency graph"
        );
        Ok(graph)
    }
}

/// Shorthand for `GraphBuilder::new().add_roots(roots).build()`.
pub fn build_graph(roots: impl IntoIterator<Item = Arc<dyn TaskNode>>) -> Result<TaskGraph> {
    GraphBuilder::new().add_roots(roots).build()
}
