// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::engine::GenerationSnapshot;
use crate::task::Identity;

#[derive(Error, Debug)]
pub enum StaledagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Carries the name of one task on the cycle.
    #[error("Cycle detected in DAG involving task '{0}'")]
    DagCycle(String),

    /// Walking the prerequisites of a task failed before anything ran.
    #[error("failed to resolve prerequisites of {identity}: {source}")]
    Build {
        identity: Identity,
        #[source]
        source: anyhow::Error,
    },

    /// A task's `materialize_result` failed.
    ///
    /// `generations` is only populated when graph dumps were requested.
    #[error("task {identity} failed: {description}")]
    TaskFailed {
        identity: Identity,
        description: String,
        #[source]
        source: anyhow::Error,
        generations: Vec<GenerationSnapshot>,
    },

    /// Internal scheduler bookkeeping went wrong. Never a task problem.
    #[error("scheduler invariant violated: {0}")]
    Invariant(String),

    #[error("executor error: {0}")]
    Executor(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StaledagError {
    /// Identity of the failing task, if this is a task failure.
    pub fn failed_task(&self) -> Option<&Identity> {
        match self {
            StaledagError::TaskFailed { identity, .. } => Some(identity),
            _ => None,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StaledagError>;
