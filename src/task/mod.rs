// src/task/mod.rs

//! The task model consumed by the graph and scheduler.
//!
//! - [`TaskNode`] is the capability trait every task kind implements.
//! - [`identity`] holds the stable key used to deduplicate nodes.
//! - [`message`] is the plain-data form of a task used to cross a process
//!   boundary, plus the registry that turns it back into a task.
//! - [`store`] is the on-disk result timestamp store used by
//!   [`command::CommandTask`].
//! - [`command`] is the shell-command task kind driven by the config file.

pub mod command;
pub mod identity;
pub mod message;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

pub use command::{CommandCatalog, CommandSpec, CommandTask};
pub use identity::Identity;
pub use message::{TaskMessage, TaskRegistry, MESSAGE_VERSION};
pub use store::StampStore;

/// Point in time used for both source freshness and cached results.
pub type Timestamp = SystemTime;

/// Named prerequisites of a task: role name -> task.
pub type Prerequisites = BTreeMap<String, Arc<dyn TaskNode>>;

/// Ordered tuple of channel names a task belongs to.
///
/// The order is part of the key: `("build", "gpu")` and `("gpu", "build")`
/// form different groups. Tasks are expected to report their labels in a
/// stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.0.iter().any(|c| c == channel)
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&self.0.join("+"))
        }
    }
}

/// How a task should produce its result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// True when running inside a pool worker process rather than the
    /// process that built the graph.
    pub run_on_worker_process: bool,
    /// True when the caller wants inline, debuggable execution with output
    /// going straight to the terminal.
    pub interactive: bool,
    /// Shell prefix (e.g. `nice -n 10`) resolved from the task's channels.
    pub prefix_command: Option<String>,
}

/// Capability interface of a schedulable unit of work.
///
/// Implementations must be cheap to clone behind an `Arc` and safe to
/// share across the executor threads.
pub trait TaskNode: Send + Sync + fmt::Debug {
    /// Stable key; two nodes with equal identity are the same node.
    fn identity(&self) -> Identity;

    /// Channels this task belongs to.
    fn labels(&self) -> Labels;

    /// When the inputs of this task last meaningfully changed.
    fn source_freshness(&self) -> Timestamp;

    /// Locality hint. Opaque to the scheduler.
    fn directory(&self) -> PathBuf;

    /// Direct prerequisites keyed by role. Failing here aborts the build.
    fn prerequisites(&self) -> anyhow::Result<Prerequisites>;

    /// Timestamp of a previously computed result, if any.
    fn peek_cached_timestamp(&self) -> Option<Timestamp>;

    /// Compute the result. Success is observable through a newer
    /// [`TaskNode::peek_cached_timestamp`] afterwards.
    fn materialize_result(&self, options: &MaterializeOptions) -> anyhow::Result<()>;

    /// Human-readable state used to annotate a failure of this task.
    fn describe_error(&self) -> String;

    /// Plain-data form for shipping to a worker process.
    ///
    /// Tasks that can only run in the current process return `None`.
    fn to_message(&self) -> Option<TaskMessage> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_display_and_lookup() {
        let labels = Labels::new(["build", "gpu"]);
        assert_eq!(labels.to_string(), "build+gpu");
        assert!(labels.contains("gpu"));
        assert!(!labels.contains("net"));
        assert_eq!(Labels::default().to_string(), "-");
    }

    #[test]
    fn label_order_is_part_of_the_key() {
        assert_ne!(Labels::new(["a", "b"]), Labels::new(["b", "a"]));
    }
}
