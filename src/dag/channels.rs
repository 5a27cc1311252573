// src/dag/channels.rs

//! Grouping of nodes by their channel labels.

use std::collections::VecDeque;

use petgraph::stable_graph::NodeIndex;

use crate::dag::graph::TaskGraph;
use crate::task::{Identity, Labels};

/// Ordered mapping from label tuple to a FIFO of nodes.
///
/// Both the order of groups and the order inside each group follow the
/// order in which nodes were pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelGroups {
    groups: Vec<(Labels, VecDeque<NodeIndex>)>,
}

impl ChannelGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, labels: &Labels, idx: NodeIndex) {
        match self.groups.iter_mut().find(|(l, _)| l == labels) {
            Some((_, queue)) => queue.push_back(idx),
            None => self.groups.push((labels.clone(), VecDeque::from([idx]))),
        }
    }

    /// Append every group of `other`, keeping FIFO order per group.
    pub fn merge(&mut self, other: ChannelGroups) {
        for (labels, queue) in other.groups {
            for idx in queue {
                self.push(&labels, idx);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|(_, q)| q.is_empty())
    }

    /// Total number of queued nodes.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, q)| q.len()).sum()
    }

    pub fn get(&self, labels: &Labels) -> Option<&VecDeque<NodeIndex>> {
        self.groups.iter().find(|(l, _)| l == labels).map(|(_, q)| q)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Labels, &VecDeque<NodeIndex>)> {
        self.groups.iter().map(|(l, q)| (l, q))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (&Labels, &mut VecDeque<NodeIndex>)> {
        self.groups.iter_mut().map(|(l, q)| (&*l, q))
    }

    /// Drop groups that have been fully drained.
    pub(crate) fn compact(&mut self) {
        self.groups.retain(|(_, q)| !q.is_empty());
    }

    /// Resolve each group to task identities, for reporting.
    pub fn identities(&self, graph: &TaskGraph) -> Vec<(Labels, Vec<Identity>)> {
        self.groups
            .iter()
            .map(|(labels, queue)| {
                let ids = queue
                    .iter()
                    .filter_map(|&idx| graph.node(idx).map(|n| n.identity.clone()))
                    .collect();
                (labels.clone(), ids)
            })
            .collect()
    }
}

/// Group `nodes` by their label tuple, preserving discovery order.
///
/// Nodes missing from the graph are skipped.
pub fn group_by_labels(
    nodes: impl IntoIterator<Item = NodeIndex>,
    graph: &TaskGraph,
) -> ChannelGroups {
    let mut groups = ChannelGroups::new();
    for idx in nodes {
        if let Some(node) = graph.node(idx) {
            groups.push(&node.labels, idx);
        }
    }
    groups
}
