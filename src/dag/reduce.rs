// src/dag/reduce.rs

//! Shrink an analyzed graph down to the work that must actually run.

use petgraph::algo::toposort;
use petgraph::stable_graph::NodeIndex;
use petgraph::visit::NodeIndexable;
use tracing::debug;

use crate::dag::graph::TaskGraph;
use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReductionReport {
    /// Fresh nodes removed from the graph.
    pub pruned_nodes: usize,
    /// Edges implied by a longer path and therefore dropped.
    pub redundant_edges: usize,
}

/// Delete every node whose `to_update` flag is false.
///
/// Returns the number of deleted nodes.
pub fn prune_fresh(graph: &mut TaskGraph) -> usize {
    let fresh: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&idx| graph.node(idx).is_some_and(|n| !n.to_update))
        .collect();

    for &idx in &fresh {
        graph.remove(idx);
    }
    fresh.len()
}

/// Drop every edge `u -> v` where `v` is also reachable through another
/// dependent of `u`. Reachability between the remaining nodes is unchanged
/// and node data stays in place.
///
/// Nodes are numbered by topological position. For each node with at least
/// two dependents, the dependents are visited in position order and a walk
/// from each one marks what it reaches; a dependent already marked when its
/// turn comes is reachable through an earlier one. Walks never go past the
/// position of the last dependent, and nodes with a single dependent are
/// skipped, so chains cost linear time.
pub fn transitive_reduction(graph: &mut TaskGraph) -> Result<usize> {
    let order =
        toposort(graph.inner(), None).map_err(|cycle| graph.cycle_error(cycle.node_id()))?;

    let mut position = vec![usize::MAX; graph.inner().node_bound()];
    for (pos, idx) in order.iter().enumerate() {
        position[idx.index()] = pos;
    }
    let dependents: Vec<Vec<usize>> = order
        .iter()
        .map(|&idx| {
            let mut succs: Vec<usize> = graph.successors(idx).map(|s| position[s.index()]).collect();
            succs.sort_unstable();
            succs
        })
        .collect();

    // marks[p] == u + 1 means p was reached from a dependent of u.
    let mut marks = vec![0usize; order.len()];
    let mut stack = Vec::new();
    let mut redundant: Vec<(NodeIndex, NodeIndex)> = Vec::new();

    for (u, succs) in dependents.iter().enumerate() {
        let &[.., _, horizon] = succs.as_slice() else {
            continue;
        };
        let stamp = u + 1;

        for &v in succs {
            if marks[v] == stamp {
                redundant.push((order[u], order[v]));
                continue;
            }
            marks[v] = stamp;
            stack.push(v);
            while let Some(w) = stack.pop() {
                for &x in &dependents[w] {
                    if x > horizon {
                        break;
                    }
                    if marks[x] != stamp {
                        marks[x] = stamp;
                        stack.push(x);
                    }
                }
            }
        }
    }

    for &(u, v) in &redundant {
        graph.remove_edge(u, v);
    }
    Ok(redundant.len())
}

/// Prune fresh nodes, then transitively reduce what is left.
pub fn reduce(graph: &mut TaskGraph) -> Result<ReductionReport> {
    let pruned_nodes = prune_fresh(graph);
    let redundant_edges = transitive_reduction(graph)?;

    debug!(
        pruned_nodes,
        redundant_edges,
        remaining_nodes = graph.node_count(),
        remaining_edges = graph.edge_count(),
        "graph reduced"
    );

    Ok(ReductionReport {
        pruned_nodes,
        redundant_edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::builder::build_graph;
    use crate::dag::staleness::analyze;
    use crate::dag::testing::StubTask;
    use crate::task::TaskNode;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn idx(g: &TaskGraph, t: &Arc<dyn TaskNode>) -> NodeIndex {
        g.index_of(&t.identity()).unwrap()
    }

    #[test]
    fn diamond_with_shortcut_loses_only_the_shortcut() {
        let a = StubTask::new("a").cached(None).arc();
        let b = StubTask::new("b").after(&a).arc();
        let c = StubTask::new("c").after(&a).arc();
        let d = StubTask::new("d").after(&b).after(&c).after(&a).arc();

        let mut g = build_graph([d.clone()]).unwrap();
        analyze(&mut g, false).unwrap();
        let report = reduce(&mut g).unwrap();

        assert_eq!(report, ReductionReport { pruned_nodes: 0, redundant_edges: 1 });
        let (ia, ib, ic, id) = (idx(&g, &a), idx(&g, &b), idx(&g, &c), idx(&g, &d));
        assert!(!g.has_edge(ia, id));
        assert!(g.has_edge(ia, ib) && g.has_edge(ia, ic));
        assert!(g.has_edge(ib, id) && g.has_edge(ic, id));
    }

    #[test]
    fn fresh_nodes_are_pruned_with_their_edges() {
        let a = StubTask::new("a").cached(Some(1)).arc();
        let b = StubTask::new("b").after(&a).cached(None).arc();
        let c = StubTask::new("c").after(&b).cached(Some(50)).arc();

        let mut g = build_graph([c.clone()]).unwrap();
        analyze(&mut g, false).unwrap();
        let report = reduce(&mut g).unwrap();

        assert_eq!(report.pruned_nodes, 1);
        assert!(!g.contains(&a.identity()));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.in_degree(idx(&g, &b)), 0);
    }

    #[test]
    fn reduction_keeps_node_data() {
        let a = StubTask::new("a").cached(None).labels(&["gpu"]).arc();
        let b = StubTask::new("b").after(&a).arc();
        let c = StubTask::new("c").after(&a).after(&b).arc();

        let mut g = build_graph([c.clone()]).unwrap();
        analyze(&mut g, false).unwrap();
        reduce(&mut g).unwrap();

        let node = g.node(idx(&g, &a)).unwrap();
        assert_eq!(node.labels.to_string(), "gpu");
        assert!(node.to_update);
        assert_eq!(node.cached, None);
    }

    #[test]
    fn deep_chain_reduces_quickly() {
        let mut g = TaskGraph::new();
        let mut prev = g.insert(StubTask::new("n0").arc());
        let first = prev;
        for i in 1..20_000 {
            let next = g.insert(StubTask::new(&format!("n{i}")).arc());
            g.add_dependency(prev, next);
            prev = next;
        }
        // one shortcut across the whole chain
        g.add_dependency(first, prev);

        let started = Instant::now();
        let dropped = transitive_reduction(&mut g).unwrap();

        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
        assert_eq!(dropped, 1);
        assert_eq!(g.edge_count(), 19_999);
        assert!(!g.has_edge(first, prev));
    }

    #[test]
    fn fan_out_keeps_independent_edges() {
        // a -> {b, c, d}, b -> d
        let mut g = TaskGraph::new();
        let a = g.insert(StubTask::new("a").arc());
        let b = g.insert(StubTask::new("b").arc());
        let c = g.insert(StubTask::new("c").arc());
        let d = g.insert(StubTask::new("d").arc());
        g.add_dependency(a, d);
        g.add_dependency(a, c);
        g.add_dependency(a, b);
        g.add_dependency(b, d);

        assert_eq!(transitive_reduction(&mut g).unwrap(), 1);
        assert!(g.has_edge(a, b) && g.has_edge(a, c) && g.has_edge(b, d));
        assert!(!g.has_edge(a, d));
    }

    #[test]
    fn long_shortcuts_are_removed() {
        // a -> b -> c -> d plus a -> d and a -> c
        let a = StubTask::new("a").cached(None).arc();
        let b = StubTask::new("b").after(&a).arc();
        let c = StubTask::new("c").after(&b).after(&a).arc();
        let d = StubTask::new("d").after(&c).after(&a).arc();

        let mut g = build_graph([d.clone()]).unwrap();
        analyze(&mut g, false).unwrap();
        let report = reduce(&mut g).unwrap();

        assert_eq!(report.redundant_edges, 2);
        assert_eq!(g.edge_count(), 3);
    }
}
