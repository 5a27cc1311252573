// src/dag/testing.rs

//! Minimal in-memory tasks for unit tests of the graph passes.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{bail, Result};

use crate::task::{Identity, Labels, MaterializeOptions, Prerequisites, TaskNode, Timestamp};

pub fn ts(secs: u64) -> Timestamp {
    UNIX_EPOCH + Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
pub struct StubTask {
    name: String,
    labels: Vec<String>,
    cached: Option<Timestamp>,
    freshness: Timestamp,
    prereqs: Vec<Arc<dyn TaskNode>>,
    broken_prereqs: bool,
}

impl StubTask {
    /// A task with a cached result at t=10 and sources from t=0.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            labels: Vec::new(),
            cached: Some(ts(10)),
            freshness: ts(0),
            prereqs: Vec::new(),
            broken_prereqs: false,
        }
    }

    pub fn cached(mut self, at: Option<u64>) -> Self {
        self.cached = at.map(ts);
        self
    }

    pub fn fresh_at(mut self, secs: u64) -> Self {
        self.freshness = ts(secs);
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn after(mut self, task: &Arc<dyn TaskNode>) -> Self {
        self.prereqs.push(Arc::clone(task));
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken_prereqs = true;
        self
    }

    pub fn arc(self) -> Arc<dyn TaskNode> {
        Arc::new(self)
    }
}

impl TaskNode for StubTask {
    fn identity(&self) -> Identity {
        Identity::new("stub", self.name.clone())
    }

    fn labels(&self) -> Labels {
        Labels::new(self.labels.iter().cloned())
    }

    fn source_freshness(&self) -> Timestamp {
        self.freshness
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from(".")
    }

    fn prerequisites(&self) -> Result<Prerequisites> {
        if self.broken_prereqs {
            bail!("malformed definition of {}", self.name);
        }
        Ok(self
            .prereqs
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("in{i}"), Arc::clone(p)))
            .collect())
    }

    fn peek_cached_timestamp(&self) -> Option<Timestamp> {
        self.cached
    }

    fn materialize_result(&self, _options: &MaterializeOptions) -> Result<()> {
        Ok(())
    }

    fn describe_error(&self) -> String {
        format!("stub task {}", self.name)
    }
}

/// Task whose only prerequisite is its peer, so two of them form a loop.
#[derive(Debug)]
pub struct LoopTask {
    name: String,
    peer: OnceLock<Weak<LoopTask>>,
}

impl LoopTask {
    /// Two tasks that each depend on the other.
    pub fn pair(a: &str, b: &str) -> (Arc<LoopTask>, Arc<LoopTask>) {
        let first = Arc::new(LoopTask {
            name: a.to_string(),
            peer: OnceLock::new(),
        });
        let second = Arc::new(LoopTask {
            name: b.to_string(),
            peer: OnceLock::new(),
        });
        let _ = first.peer.set(Arc::downgrade(&second));
        let _ = second.peer.set(Arc::downgrade(&first));
        (first, second)
    }
}

impl TaskNode for LoopTask {
    fn identity(&self) -> Identity {
        Identity::new("loop", self.name.clone())
    }

    fn labels(&self) -> Labels {
        Labels::default()
    }

    fn source_freshness(&self) -> Timestamp {
        ts(0)
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from(".")
    }

    fn prerequisites(&self) -> Result<Prerequisites> {
        let peer = self
            .peer
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| anyhow::anyhow!("peer of {} dropped", self.name))?;
        let peer: Arc<dyn TaskNode> = peer;
        Ok([("peer".to_string(), peer)].into_iter().collect())
    }

    fn peek_cached_timestamp(&self) -> Option<Timestamp> {
        None
    }

    fn materialize_result(&self, _options: &MaterializeOptions) -> Result<()> {
        Ok(())
    }

    fn describe_error(&self) -> String {
        format!("loop task {}", self.name)
    }
}
