// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::ExecutorKind;

/// Command-line arguments for `staledag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "staledag",
    version,
    about = "Bring tasks up to date, re-running only what is stale.",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Staledag.toml")]
    pub config: String,

    /// Bring this task (and what it depends on) up to date. Repeatable.
    ///
    /// Default: every task no other task depends on.
    #[arg(long = "task", value_name = "NAME")]
    pub tasks: Vec<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STALEDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse, validate and print what would run, without running it.
    #[arg(long)]
    pub dry_run: bool,

    /// Execution backend: local, threads or pool. Overrides `[config]`.
    #[arg(long, value_name = "KIND")]
    pub executor: Option<ExecutorKind>,

    /// Number of worker threads or processes. Overrides `[config]`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Run tasks inline with their output on the terminal.
    /// Implies the local executor.
    #[arg(long)]
    pub interactive: bool,

    /// Only consider missing results and upstream changes, not source
    /// files newer than a result.
    #[arg(long)]
    pub ignore_source_changes: bool,

    /// Show one progress bar per channel.
    #[arg(long)]
    pub progress: bool,

    /// Print per-generation snapshots of the remaining graph as JSON.
    #[arg(long)]
    pub dump_graphs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Serve the process-pool protocol on stdin/stdout.
    #[command(hide = true)]
    Worker,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
