#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use staledag::task::TaskNode;
use staledag_test_utils::{FakeTaskBuilder, FakeWorld};

pub use staledag_test_utils::{init_tracing, with_timeout};

/// `names[0] -> names[1] -> ...`, all on `labels`. Returns the tasks in
/// chain order; the last one is the sink.
pub fn chain(world: &Arc<FakeWorld>, names: &[&str], labels: &[&str]) -> Vec<Arc<dyn TaskNode>> {
    let mut out: Vec<Arc<dyn TaskNode>> = Vec::new();
    for name in names {
        let mut b = FakeTaskBuilder::new(world, name).labels(labels);
        if let Some(prev) = out.last() {
            b = b.after(prev);
        }
        out.push(b.build());
    }
    out
}

pub fn limits(pairs: &[(&str, usize)]) -> HashMap<String, usize> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

pub fn prefixes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
