// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::task::{CommandCatalog, CommandSpec};
use crate::types::ExecutorKind;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// executor = "threads"
/// workers = 4
///
/// [rate_limits]
/// gpu = 1
///
/// [prefix_commands]
/// gpu = "nice -n 10"
///
/// [task.train]
/// cmd = "python train.py"
/// after = ["prepare"]
/// labels = ["gpu"]
/// sources = ["train.py"]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Channel name -> maximum concurrently running tasks of that channel.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, usize>,

    /// Channel name -> command prepended to the task command.
    #[serde(default)]
    pub prefix_commands: BTreeMap<String, String>,

    /// All tasks from `[task.<name>]`, keyed by task name.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holding one means every dependency is known and the task graph is acyclic.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub rate_limits: BTreeMap<String, usize>,
    pub prefix_commands: BTreeMap<String, String>,
    pub task: BTreeMap<String, TaskConfig>,
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// `"local"`, `"threads"` (default) or `"pool"`.
    #[serde(default)]
    pub executor: ExecutorKind,

    /// Worker threads or processes; ignored by the local executor.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Re-run tasks whose sources are newer than their last result.
    #[serde(default = "default_true")]
    pub detect_source_change: bool,

    #[serde(default)]
    pub show_progress: bool,

    /// Record and print per-generation snapshots of the remaining graph.
    #[serde(default)]
    pub dump_graphs: bool,

    /// Where result stamps are stored, relative to the config file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".staledag")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            executor: ExecutorKind::default(),
            workers: default_workers(),
            detect_source_change: true,
            show_progress: false,
            dump_graphs: false,
            state_dir: default_state_dir(),
        }
    }
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Shell command to execute.
    pub cmd: String,

    /// Tasks that must be up to date before this one runs.
    #[serde(default)]
    pub after: Vec<String>,

    /// Channels this task belongs to, in priority order for prefix commands.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Input files; a change to any of them makes the task stale.
    #[serde(default)]
    pub sources: Vec<PathBuf>,

    /// Working directory, relative to the config file. Defaults to the
    /// config file's directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl ConfigFile {
    /// Construct without validation. Callers are expected to go through
    /// `ConfigFile::try_from(raw)` instead.
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        rate_limits: BTreeMap<String, usize>,
        prefix_commands: BTreeMap<String, String>,
        task: BTreeMap<String, TaskConfig>,
    ) -> Self {
        Self {
            config,
            rate_limits,
            prefix_commands,
            task,
        }
    }

    /// Plain task definitions with every relative path resolved against
    /// `config_dir`.
    pub fn command_specs(&self, config_dir: &Path) -> Vec<CommandSpec> {
        let state_dir = resolve(config_dir, &self.config.state_dir);
        self.task
            .iter()
            .map(|(name, tc)| CommandSpec {
                name: name.clone(),
                cmd: tc.cmd.clone(),
                after: tc.after.clone(),
                labels: tc.labels.clone(),
                sources: tc.sources.clone(),
                directory: tc
                    .directory
                    .as_deref()
                    .map(|d| resolve(config_dir, d))
                    .unwrap_or_else(|| config_dir.to_path_buf()),
                state_dir: state_dir.clone(),
            })
            .collect()
    }

    pub fn catalog(&self, config_dir: &Path) -> Arc<CommandCatalog> {
        CommandCatalog::new(self.command_specs(config_dir))
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
