//! In-memory tasks sharing one fake "disk".
//!
//! A [`FakeWorld`] stands in for the result store: it holds the cached
//! timestamp of every fake task, hands out monotonically increasing
//! timestamps for new results, and records what ran and how many tasks of
//! each channel were running at once.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use staledag::task::{Identity, Labels, MaterializeOptions, Prerequisites, TaskNode, Timestamp};

/// First timestamp handed out for freshly computed results.
const CLOCK_START: u64 = 1_000;

#[derive(Debug, Default)]
struct WorldState {
    stamps: HashMap<String, u64>,
    clock: u64,
    runs: Vec<String>,
    finished: HashSet<String>,
    running: HashMap<String, usize>,
    max_running: HashMap<String, usize>,
    running_total: usize,
    max_running_total: usize,
    prefixes: HashMap<String, Option<String>>,
    violations: Vec<String>,
}

/// Shared state of a set of [`FakeTask`]s.
#[derive(Debug, Default)]
pub struct FakeWorld {
    state: Mutex<WorldState>,
}

pub fn at(secs: u64) -> Timestamp {
    UNIX_EPOCH + Duration::from_secs(secs)
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        let world = Self::default();
        world.lock().clock = CLOCK_START;
        Arc::new(world)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WorldState> {
        self.state.lock().expect("fake world poisoned")
    }

    /// Pretend `name` was computed at `secs`.
    pub fn set_stamp(&self, name: &str, secs: u64) {
        self.lock().stamps.insert(name.to_string(), secs);
    }

    pub fn stamp(&self, name: &str) -> Option<Timestamp> {
        self.lock().stamps.get(name).copied().map(at)
    }

    /// Names in the order their runs started.
    pub fn runs(&self) -> Vec<String> {
        self.lock().runs.clone()
    }

    pub fn run_count(&self, name: &str) -> usize {
        self.lock().runs.iter().filter(|r| r.as_str() == name).count()
    }

    /// Highest number of simultaneously running tasks labelled `channel`.
    pub fn max_running(&self, channel: &str) -> usize {
        self.lock().max_running.get(channel).copied().unwrap_or(0)
    }

    pub fn max_running_total(&self) -> usize {
        self.lock().max_running_total
    }

    /// Prefix command the last run of `name` received.
    pub fn prefix_of(&self, name: &str) -> Option<String> {
        self.lock().prefixes.get(name).cloned().flatten()
    }

    /// Tasks that started before one of their prerequisites had finished.
    pub fn violations(&self) -> Vec<String> {
        self.lock().violations.clone()
    }

    fn start(&self, task: &FakeTask, options: &MaterializeOptions) {
        let mut st = self.lock();
        st.runs.push(task.name.clone());
        st.prefixes
            .insert(task.name.clone(), options.prefix_command.clone());

        for prereq in task.prereq_names.iter() {
            if st.runs.contains(prereq) && !st.finished.contains(prereq) {
                let msg = format!("{} started before {} finished", task.name, prereq);
                st.violations.push(msg);
            }
        }

        for channel in task.labels.iter() {
            let running = st.running.entry(channel.clone()).or_insert(0);
            *running += 1;
            let now = *running;
            let max = st.max_running.entry(channel.clone()).or_insert(0);
            *max = (*max).max(now);
        }
        st.running_total += 1;
        st.max_running_total = st.max_running_total.max(st.running_total);
    }

    fn finish(&self, task: &FakeTask, success: bool) {
        let mut st = self.lock();
        for channel in task.labels.iter() {
            if let Some(n) = st.running.get_mut(channel) {
                *n -= 1;
            }
        }
        st.running_total -= 1;

        if success {
            st.clock += 1;
            let now = st.clock;
            st.stamps.insert(task.name.clone(), now);
            st.finished.insert(task.name.clone());
        }
    }
}

/// A task whose "result" is an entry in its [`FakeWorld`].
#[derive(Debug)]
pub struct FakeTask {
    pub(crate) name: String,
    pub(crate) labels: Vec<String>,
    pub(crate) prereqs: Vec<Arc<dyn TaskNode>>,
    pub(crate) prereq_names: Vec<String>,
    pub(crate) world: Arc<FakeWorld>,
    pub(crate) freshness: u64,
    pub(crate) fails: bool,
    pub(crate) duration: Duration,
}

impl FakeTask {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TaskNode for FakeTask {
    fn identity(&self) -> Identity {
        Identity::new("fake", self.name.clone())
    }

    fn labels(&self) -> Labels {
        Labels::new(self.labels.iter().cloned())
    }

    fn source_freshness(&self) -> SystemTime {
        at(self.freshness)
    }

    fn directory(&self) -> PathBuf {
        PathBuf::from(".")
    }

    fn prerequisites(&self) -> Result<Prerequisites> {
        Ok(self
            .prereqs
            .iter()
            .zip(self.prereq_names.iter())
            .map(|(task, name)| (name.clone(), Arc::clone(task)))
            .collect())
    }

    fn peek_cached_timestamp(&self) -> Option<Timestamp> {
        self.world.stamp(&self.name)
    }

    fn materialize_result(&self, options: &MaterializeOptions) -> Result<()> {
        self.world.start(self, options);
        if !self.duration.is_zero() {
            std::thread::sleep(self.duration);
        }
        self.world.finish(self, !self.fails);

        if self.fails {
            return Err(anyhow!("simulated failure in {}", self.name));
        }
        Ok(())
    }

    fn describe_error(&self) -> String {
        format!(
            "fake task '{}' (ran {} times)",
            self.name,
            self.world.run_count(&self.name)
        )
    }
}
