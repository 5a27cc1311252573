// src/dag/staleness.rs

//! Decide which nodes must re-run.

use petgraph::algo::toposort;
use tracing::{debug, trace};

use crate::dag::graph::TaskGraph;
use crate::errors::Result;

/// Outcome of [`analyze`], for logging and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StalenessReport {
    pub total: usize,
    pub stale: usize,
}

/// Annotate every node's `to_update` flag in one topological pass.
///
/// A node is stale when:
/// - it has no cached result, or
/// - `detect_source_change` is set and its cached result is older than its
///   sources, or
/// - any direct prerequisite is stale, or was computed more recently than
///   this node's cached result.
///
/// Prerequisites are always settled before their dependents, so staleness
/// propagates across every edge. Only the snapshotted timestamps are read,
/// which makes the pass idempotent.
pub fn analyze(graph: &mut TaskGraph, detect_source_change: bool) -> Result<StalenessReport> {
    let order =
        toposort(graph.inner(), None).map_err(|cycle| graph.cycle_error(cycle.node_id()))?;

    let mut report = StalenessReport {
        total: order.len(),
        stale: 0,
    };

    for idx in order {
        let Some(node) = graph.node(idx) else {
            continue;
        };

        let own_stale = match node.cached {
            None => true,
            Some(cached) => detect_source_change && cached < node.source_freshness,
        };

        let stale = own_stale || {
            let cached = node.cached;
            graph.predecessors(idx).any(|p| {
                graph
                    .node(p)
                    .is_some_and(|pred| pred.to_update || pred.cached > cached)
            })
        };

        if let Some(node) = graph.node_mut(idx) {
            trace!(task = %node.identity, stale, own_stale, "staleness decided");
            node.to_update = stale;
        }
        if stale {
            report.stale += 1;
        }
    }

    debug!(total = report.total, stale = report.stale, "staleness analysis complete");
    Ok(report)
}
