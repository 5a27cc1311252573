// src/engine/summary.rs

use std::collections::BTreeMap;

use serde::Serialize;

/// Remaining work after one batch of completions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerationSnapshot {
    pub generation: usize,
    /// Nodes still in the graph (queued, running or not yet ready) per kind.
    pub remaining_by_kind: BTreeMap<String, usize>,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: usize,
}

/// Result of a successful [`build_and_run`](crate::engine::build_and_run).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Size of the full dependency closure.
    pub total_nodes: usize,
    /// Nodes found stale by the analysis.
    pub stale_nodes: usize,
    pub redundant_edges: usize,
    /// Nodes handed to the scheduler, per task kind.
    pub scheduled_by_kind: BTreeMap<String, usize>,
    pub completed: usize,
    /// Only populated when graph dumps were requested.
    pub generations: Vec<GenerationSnapshot>,
}

impl RunSummary {
    pub fn scheduled(&self) -> usize {
        self.scheduled_by_kind.values().sum()
    }

    /// `true` when everything was already up to date.
    pub fn is_noop(&self) -> bool {
        self.scheduled() == 0
    }
}
