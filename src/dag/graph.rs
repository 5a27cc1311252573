// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction::{Incoming, Outgoing};

use crate::errors::StaledagError;
use crate::task::{Identity, Labels, TaskNode, Timestamp};

/// Data attached to each node of a [`TaskGraph`].
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub task: Arc<dyn TaskNode>,
    pub identity: Identity,
    pub labels: Labels,
    /// Cached result timestamp, read once when the node entered the graph.
    pub cached: Option<Timestamp>,
    pub source_freshness: Timestamp,
    /// Set by the staleness analysis; `true` means the node must re-run.
    pub to_update: bool,
}

/// Task dependency graph for a single run.
///
/// Edges point from prerequisite to dependent. A stable graph is used so
/// node indices stay valid while the reducer and scheduler delete nodes.
#[derive(Debug, Default)]
pub struct TaskGraph {
    graph: StableDiGraph<GraphNode, ()>,
    index: HashMap<Identity, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task, snapshotting its timestamps. Returns the existing
    /// index if a node with the same identity is already present.
    pub fn insert(&mut self, task: Arc<dyn TaskNode>) -> NodeIndex {
        let identity = task.identity();
        if let Some(&idx) = self.index.get(&identity) {
            return idx;
        }

        let node = GraphNode {
            labels: task.labels(),
            cached: task.peek_cached_timestamp(),
            source_freshness: task.source_freshness(),
            identity: identity.clone(),
            to_update: false,
            task,
        };
        let idx = self.graph.add_node(node);
        self.index.insert(identity, idx);
        idx
    }

    /// Add `prerequisite -> dependent`, ignoring duplicates.
    pub fn add_dependency(&mut self, prerequisite: NodeIndex, dependent: NodeIndex) {
        self.graph.update_edge(prerequisite, dependent, ());
    }

    pub fn index_of(&self, identity: &Identity) -> Option<NodeIndex> {
        self.index.get(identity).copied()
    }

    pub fn node(&self, idx: NodeIndex) -> Option<&GraphNode> {
        self.graph.node_weight(idx)
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> Option<&mut GraphNode> {
        self.graph.node_weight_mut(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.index.contains_key(identity)
    }

    /// Direct prerequisites of `idx`.
    pub fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Incoming)
    }

    /// Direct dependents of `idx`.
    pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Outgoing)
    }

    /// Number of prerequisites still present in the graph.
    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.predecessors(idx).count()
    }

    /// Nodes with no prerequisites left, in index order.
    pub fn ready_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| self.in_degree(idx) == 0)
            .collect()
    }

    pub fn has_edge(&self, from: NodeIndex, to: NodeIndex) -> bool {
        self.graph.find_edge(from, to).is_some()
    }

    /// Edges as `(prerequisite, dependent)` pairs.
    pub fn edges(&self) -> Vec<(NodeIndex, NodeIndex)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .collect()
    }

    pub fn remove_edge(&mut self, from: NodeIndex, to: NodeIndex) -> bool {
        match self.graph.find_edge(from, to) {
            Some(e) => self.graph.remove_edge(e).is_some(),
            None => false,
        }
    }

    /// Delete a node and its incident edges.
    pub fn remove(&mut self, idx: NodeIndex) -> Option<GraphNode> {
        let node = self.graph.remove_node(idx)?;
        self.index.remove(&node.identity);
        Some(node)
    }

    /// Delete a finished node and return the dependents that have no
    /// prerequisites left, in the order their edges were removed.
    pub fn complete(&mut self, idx: NodeIndex) -> Vec<NodeIndex> {
        let dependents: Vec<NodeIndex> = self.successors(idx).collect();
        self.remove(idx);
        dependents
            .into_iter()
            .filter(|&d| self.in_degree(d) == 0)
            .collect()
    }

    /// `DagCycle` naming the task at `idx`.
    pub(crate) fn cycle_error(&self, idx: NodeIndex) -> StaledagError {
        let task = match self.node(idx) {
            Some(node) => node.identity.to_string(),
            None => format!("{idx:?}"),
        };
        StaledagError::DagCycle(task)
    }

    /// Remaining node count per task kind.
    pub fn count_by_kind(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for node in self.graph.node_indices().filter_map(|i| self.graph.node_weight(i)) {
            *counts.entry(node.identity.kind.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub(crate) fn inner(&self) -> &StableDiGraph<GraphNode, ()> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::testing::StubTask;

    #[test]
    fn insert_deduplicates_by_identity() {
        let mut g = TaskGraph::new();
        let a = g.insert(StubTask::new("a").arc());
        let again = g.insert(StubTask::new("a").arc());
        assert_eq!(a, again);
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn complete_unlocks_only_when_last_prerequisite_finishes() {
        let mut g = TaskGraph::new();
        let a = g.insert(StubTask::new("a").arc());
        let b = g.insert(StubTask::new("b").arc());
        let c = g.insert(StubTask::new("c").arc());
        g.add_dependency(a, c);
        g.add_dependency(b, c);

        assert!(g.complete(a).is_empty());
        assert_eq!(g.complete(b), vec![c]);
        assert_eq!(g.node_count(), 1);
        assert!(!g.contains(&StubTask::new("a").arc().identity()));
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let mut g = TaskGraph::new();
        let a = g.insert(StubTask::new("a").arc());
        let b = g.insert(StubTask::new("b").arc());
        g.add_dependency(a, b);
        g.add_dependency(a, b);
        assert_eq!(g.edge_count(), 1);
    }
}
