// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod progress;
pub mod task;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::{config_base_dir, load_and_validate, ConfigFile};
use crate::engine::{build_and_run, Plan, RunOptions, RunSummary};
use crate::errors::StaledagError;
use crate::exec::{LocalExecutor, ProcessPoolExecutor, ThreadedExecutor, WorkerCommand};
use crate::task::{TaskNode, TaskRegistry};
use crate::types::ExecutorKind;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and root selection
/// - the run options (config file, overridden by CLI flags)
/// - the executor backend
/// - summary output
pub async fn run(args: CliArgs) -> Result<()> {
    if let Some(Command::Worker) = args.command {
        let registry = Arc::new(TaskRegistry::with_defaults());
        exec::serve_worker(registry).await?;
        return Ok(());
    }

    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let base_dir = config_base_dir(&config_path);
    let catalog = cfg.catalog(&base_dir);

    let root_names = if args.tasks.is_empty() {
        catalog.sinks()
    } else {
        args.tasks.clone()
    };
    info!(roots = ?root_names, "selected root tasks");
    let roots = root_names
        .iter()
        .map(|name| catalog.task(name))
        .collect::<Result<Vec<Arc<dyn TaskNode>>>>()?;

    let options = run_options(&cfg, &args);

    if args.dry_run {
        let plan = engine::plan(roots, options.detect_source_change)?;
        print_dry_run(&plan)?;
        return Ok(());
    }

    let kind = if args.interactive {
        ExecutorKind::Local
    } else {
        args.executor.unwrap_or(cfg.config.executor)
    };
    let workers = args.workers.unwrap_or(cfg.config.workers);
    if workers == 0 {
        return Err(StaledagError::ConfigError("--workers must be >= 1".to_string()).into());
    }
    info!(executor = %kind, workers, "starting run");

    let outcome = match kind {
        ExecutorKind::Local => build_and_run(roots, &mut LocalExecutor::new(), &options).await,
        ExecutorKind::Threads => {
            build_and_run(roots, &mut ThreadedExecutor::new(workers), &options).await
        }
        ExecutorKind::Pool => {
            let mut pool = ProcessPoolExecutor::spawn(workers, WorkerCommand::current_exe()?)?;
            let outcome = build_and_run(roots, &mut pool, &options).await;
            pool.shutdown().await;
            outcome
        }
    };

    match outcome {
        Ok(summary) => {
            print_summary(&summary, options.dump_graphs)?;
            Ok(())
        }
        Err(err) => {
            if let StaledagError::TaskFailed { generations, .. } = &err {
                if options.dump_graphs && !generations.is_empty() {
                    eprintln!("{}", serde_json::to_string_pretty(generations)?);
                }
            }
            Err(err.into())
        }
    }
}

fn run_options(cfg: &ConfigFile, args: &CliArgs) -> RunOptions {
    RunOptions {
        detect_source_change: cfg.config.detect_source_change && !args.ignore_source_changes,
        rate_limits: cfg
            .rate_limits
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect::<HashMap<_, _>>(),
        prefix_commands: cfg
            .prefix_commands
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<HashMap<_, _>>(),
        show_progress: cfg.config.show_progress || args.progress,
        dump_graphs: cfg.config.dump_graphs || args.dump_graphs,
        interactive: args.interactive,
    }
}

fn print_summary(summary: &RunSummary, dump_graphs: bool) -> Result<()> {
    if summary.is_noop() {
        println!("staledag: all {} tasks up to date", summary.total_nodes);
    } else {
        println!(
            "staledag: ran {} of {} tasks ({} stale)",
            summary.completed, summary.total_nodes, summary.stale_nodes
        );
        for (kind, count) in summary.scheduled_by_kind.iter() {
            println!("  {kind}: {count}");
        }
    }

    if dump_graphs {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }
    Ok(())
}

/// Print the reduced graph: what would run, in order.
fn print_dry_run(plan: &Plan) -> Result<()> {
    println!("staledag dry-run");
    println!(
        "  {} tasks total, {} stale, {} redundant edges dropped",
        plan.staleness.total, plan.staleness.stale, plan.reduction.redundant_edges
    );
    println!();

    let steps = plan.steps()?;
    if steps.is_empty() {
        println!("nothing to do");
    }
    for step in steps.iter() {
        println!("  - {} [{}]", step.task, step.channel);
        if !step.after.is_empty() {
            println!("      after: {:?}", step.after);
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
