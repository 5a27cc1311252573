// src/task/message.rs

//! Plain-data task messages for worker processes.
//!
//! A task is never shipped as an object graph. Only its identity and the
//! constructor arguments of its kind travel; the worker rebuilds the task
//! through a [`TaskRegistry`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::task::command::CommandTask;
use crate::task::{Identity, TaskNode};

/// Current version of the message format. Bump on incompatible changes.
pub const MESSAGE_VERSION: u32 = 1;

/// Serializable description of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub version: u32,
    pub identity: Identity,
    /// Constructor arguments, interpreted by the factory for `identity.kind`.
    pub args: serde_json::Value,
}

impl TaskMessage {
    pub fn new(identity: Identity, args: serde_json::Value) -> Self {
        Self {
            version: MESSAGE_VERSION,
            identity,
            args,
        }
    }
}

type TaskFactory = Box<dyn Fn(&TaskMessage) -> Result<Arc<dyn TaskNode>> + Send + Sync>;

/// Maps task kinds to the factories that rebuild them from messages.
#[derive(Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("TaskRegistry").field("kinds", &kinds).finish()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every task kind shipped by this crate.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CommandTask::KIND, CommandTask::from_message);
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&TaskMessage) -> Result<Arc<dyn TaskNode>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Rebuild a task from its message.
    pub fn decode(&self, message: &TaskMessage) -> Result<Arc<dyn TaskNode>> {
        if message.version != MESSAGE_VERSION {
            bail!(
                "unsupported task message version {} (expected {})",
                message.version,
                MESSAGE_VERSION
            );
        }

        let factory = self
            .factories
            .get(&message.identity.kind)
            .ok_or_else(|| anyhow!("no task kind '{}' registered", message.identity.kind))?;

        let task = factory(message)?;
        if task.identity() != message.identity {
            bail!(
                "decoded task identity {} does not match message identity {}",
                task.identity(),
                message.identity
            );
        }
        Ok(task)
    }
}
