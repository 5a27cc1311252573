#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use staledag::config::{ConfigFile, ConfigSection, RawConfigFile, TaskConfig};
use staledag::errors::Result;
use staledag::task::TaskNode;

use crate::fake_task::{FakeTask, FakeWorld};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                rate_limits: BTreeMap::new(),
                prefix_commands: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_rate_limit(mut self, channel: &str, limit: usize) -> Self {
        self.config.rate_limits.insert(channel.to_string(), limit);
        self
    }

    pub fn with_prefix_command(mut self, channel: &str, prefix: &str) -> Self {
        self.config
            .prefix_commands
            .insert(channel.to_string(), prefix.to_string());
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.config.workers = workers;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.state_dir = dir.into();
        self
    }

    /// Validate and build.
    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                after: vec![],
                labels: vec![],
                sources: vec![],
                directory: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.after.push(dep.to_string());
        self
    }

    pub fn label(mut self, channel: &str) -> Self {
        self.task.labels.push(channel.to_string());
        self
    }

    pub fn source(mut self, path: &str) -> Self {
        self.task.sources.push(PathBuf::from(path));
        self
    }

    pub fn directory(mut self, dir: &str) -> Self {
        self.task.directory = Some(PathBuf::from(dir));
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Builder for [`FakeTask`]s living in one [`FakeWorld`].
pub struct FakeTaskBuilder {
    task: FakeTask,
}

impl FakeTaskBuilder {
    /// A task with no cached result, so it is stale unless a stamp is set.
    pub fn new(world: &Arc<FakeWorld>, name: &str) -> Self {
        Self {
            task: FakeTask {
                name: name.to_string(),
                labels: vec![],
                prereqs: vec![],
                prereq_names: vec![],
                world: Arc::clone(world),
                freshness: 0,
                fails: false,
                duration: Duration::ZERO,
            },
        }
    }

    pub fn after(mut self, prereq: &Arc<dyn TaskNode>) -> Self {
        self.task.prereq_names.push(prereq.identity().args);
        self.task.prereqs.push(Arc::clone(prereq));
        self
    }

    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.task.labels = labels.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Sources last changed at `secs`.
    pub fn fresh_at(mut self, secs: u64) -> Self {
        self.task.freshness = secs;
        self
    }

    pub fn fails(mut self) -> Self {
        self.task.fails = true;
        self
    }

    /// Block the executing thread this long inside `materialize_result`.
    pub fn takes(mut self, duration: Duration) -> Self {
        self.task.duration = duration;
        self
    }

    pub fn build(self) -> Arc<dyn TaskNode> {
        Arc::new(self.task)
    }
}
