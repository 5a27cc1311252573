// src/task/command.rs

//! Shell-command tasks defined in the config file.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::task::{
    Identity, Labels, MaterializeOptions, Prerequisites, StampStore, TaskMessage, TaskNode,
    Timestamp,
};

/// Number of trailing stderr lines kept in a failure message.
const STDERR_TAIL_LINES: usize = 20;

/// Everything needed to construct a [`CommandTask`], in plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub cmd: String,
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Input files, relative to `directory`.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Working directory of the command.
    pub directory: PathBuf,
    /// Where result stamps live.
    pub state_dir: PathBuf,
}

/// Fields that make up a command task's identity.
///
/// Labels and the state directory are deliberately left out: moving a task
/// to another channel does not invalidate its result.
#[derive(Serialize)]
struct IdentityArgs<'a> {
    name: &'a str,
    cmd: &'a str,
    after: &'a [String],
    sources: &'a [PathBuf],
    directory: &'a Path,
}

/// All command specs of one config, used to resolve `after` names.
#[derive(Debug, Default)]
pub struct CommandCatalog {
    specs: BTreeMap<String, CommandSpec>,
}

impl CommandCatalog {
    pub fn new(specs: impl IntoIterator<Item = CommandSpec>) -> Arc<Self> {
        Arc::new(Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(|s| s.as_str())
    }

    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    /// Build the task called `name`, wired to resolve its prerequisites
    /// through this catalog.
    pub fn task(self: &Arc<Self>, name: &str) -> Result<Arc<dyn TaskNode>> {
        let spec = self
            .specs
            .get(name)
            .ok_or_else(|| anyhow!("unknown task '{name}'"))?
            .clone();
        Ok(Arc::new(CommandTask::with_catalog(spec, Arc::clone(self))?))
    }

    /// Tasks that no other task depends on, sorted by name.
    pub fn sinks(&self) -> Vec<String> {
        let depended_on: HashSet<&str> = self
            .specs
            .values()
            .flat_map(|s| s.after.iter().map(|d| d.as_str()))
            .collect();
        self.specs
            .keys()
            .filter(|name| !depended_on.contains(name.as_str()))
            .cloned()
            .collect()
    }
}

/// A task that runs a shell command and records a stamp on success.
#[derive(Debug)]
pub struct CommandTask {
    spec: CommandSpec,
    identity: Identity,
    /// `None` on worker processes, which never walk prerequisites.
    catalog: Option<Arc<CommandCatalog>>,
}

impl CommandTask {
    pub const KIND: &'static str = "command";

    fn build(spec: CommandSpec, catalog: Option<Arc<CommandCatalog>>) -> Result<Self> {
        let identity = Identity::from_args(
            Self::KIND,
            &IdentityArgs {
                name: &spec.name,
                cmd: &spec.cmd,
                after: &spec.after,
                sources: &spec.sources,
                directory: &spec.directory,
            },
        )
        .with_context(|| format!("computing identity of task '{}'", spec.name))?;

        Ok(Self {
            spec,
            identity,
            catalog,
        })
    }

    pub fn with_catalog(spec: CommandSpec, catalog: Arc<CommandCatalog>) -> Result<Self> {
        Self::build(spec, Some(catalog))
    }

    /// A task detached from any catalog; it can run but not resolve
    /// prerequisites.
    pub fn standalone(spec: CommandSpec) -> Result<Self> {
        Self::build(spec, None)
    }

    /// Factory registered in [`crate::task::TaskRegistry::with_defaults`].
    pub fn from_message(message: &TaskMessage) -> Result<Arc<dyn TaskNode>> {
        let spec: CommandSpec = serde_json::from_value(message.args.clone())
            .context("decoding command task arguments")?;
        Ok(Arc::new(Self::standalone(spec)?))
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn store(&self) -> StampStore {
        StampStore::new(&self.spec.state_dir)
    }

    fn command_line(&self, prefix: Option<&str>) -> String {
        match prefix {
            Some(p) if !p.trim().is_empty() => format!("{} {}", p.trim(), self.spec.cmd),
            _ => self.spec.cmd.clone(),
        }
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(line);
        c
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

impl TaskNode for CommandTask {
    fn identity(&self) -> Identity {
        self.identity.clone()
    }

    fn labels(&self) -> Labels {
        Labels::new(self.spec.labels.iter().cloned())
    }

    /// Newest modification time among the task's source files.
    fn source_freshness(&self) -> Timestamp {
        self.spec
            .sources
            .iter()
            .filter_map(|src| {
                let path = self.spec.directory.join(src);
                match fs::metadata(&path).and_then(|m| m.modified()) {
                    Ok(t) => Some(t),
                    Err(e) => {
                        debug!(task = %self.spec.name, path = ?path, error = %e, "source not readable; ignoring");
                        None
                    }
                }
            })
            .max()
            .unwrap_or(UNIX_EPOCH)
    }

    fn directory(&self) -> PathBuf {
        self.spec.directory.clone()
    }

    fn prerequisites(&self) -> Result<Prerequisites> {
        let mut prereqs = Prerequisites::new();
        if self.spec.after.is_empty() {
            return Ok(prereqs);
        }

        let catalog = self.catalog.as_ref().ok_or_else(|| {
            anyhow!(
                "prerequisites of '{}' are unavailable without a task catalog",
                self.spec.name
            )
        })?;

        for dep in &self.spec.after {
            let task = catalog
                .task(dep)
                .with_context(|| format!("resolving `after` of task '{}'", self.spec.name))?;
            prereqs.insert(dep.clone(), task);
        }
        Ok(prereqs)
    }

    fn peek_cached_timestamp(&self) -> Option<Timestamp> {
        self.store().load(&self.identity)
    }

    fn materialize_result(&self, options: &MaterializeOptions) -> Result<()> {
        let line = self.command_line(options.prefix_command.as_deref());
        info!(
            task = %self.spec.name,
            cmd = %line,
            worker = options.run_on_worker_process,
            "starting task process"
        );

        let mut cmd = shell_command(&line);
        cmd.current_dir(&self.spec.directory).stdin(Stdio::null());

        let status = if options.interactive {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
            cmd.status()
                .with_context(|| format!("spawning process for task '{}'", self.spec.name))?
        } else if options.run_on_worker_process {
            // The worker's stdout carries the pool protocol.
            cmd.stdout(Stdio::from(io::stderr())).stderr(Stdio::inherit());
            cmd.status()
                .with_context(|| format!("spawning process for task '{}'", self.spec.name))?
        } else {
            let output = cmd
                .output()
                .with_context(|| format!("spawning process for task '{}'", self.spec.name))?;
            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!(task = %self.spec.name, "stdout: {}", line);
            }
            for line in String::from_utf8_lossy(&output.stderr).lines() {
                debug!(task = %self.spec.name, "stderr: {}", line);
            }
            if !output.status.success() {
                let code = output.status.code().unwrap_or(-1);
                let tail = stderr_tail(&output.stderr);
                if tail.is_empty() {
                    bail!("command `{line}` exited with code {code}");
                }
                bail!("command `{line}` exited with code {code}:\n{tail}");
            }
            output.status
        };

        let code = status.code().unwrap_or(-1);
        info!(task = %self.spec.name, exit_code = code, success = status.success(), "task process exited");
        if !status.success() {
            bail!("command `{line}` exited with code {code}");
        }

        self.store()
            .touch(&self.identity)
            .with_context(|| format!("recording result of task '{}'", self.spec.name))?;
        Ok(())
    }

    fn describe_error(&self) -> String {
        let last = match self.peek_cached_timestamp() {
            Some(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => format!("{}ms since epoch", d.as_millis()),
                Err(_) => "before epoch".to_string(),
            },
            None => "never".to_string(),
        };
        format!(
            "command task '{}' (cmd: `{}`, dir: {:?}, labels: {}, last success: {})",
            self.spec.name,
            self.spec.cmd,
            self.spec.directory,
            self.labels(),
            last
        )
    }

    fn to_message(&self) -> Option<TaskMessage> {
        let args = serde_json::to_value(&self.spec).ok()?;
        Some(TaskMessage::new(self.identity.clone(), args))
    }
}
