// src/exec/worker.rs

//! Worker-process side of the process pool.
//!
//! Protocol: one JSON [`WorkerRequest`] per line on stdin, answered by one
//! JSON [`WorkerReply`] per line on stdout, strictly in order. Logs and task
//! output go to stderr so stdout only ever carries replies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::backend::Ticket;
use crate::task::{MaterializeOptions, TaskMessage, TaskRegistry};

/// Subcommand name the pool uses to start workers of this binary.
pub const WORKER_SUBCOMMAND: &str = "worker";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub ticket: Ticket,
    pub message: TaskMessage,
    pub prefix_command: Option<String>,
    pub interactive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub ticket: Ticket,
    /// `None` on success; otherwise the full error chain of the failure.
    pub error: Option<String>,
}

/// Rebuild the requested task and materialize it in this process.
pub async fn handle_request(registry: Arc<TaskRegistry>, request: WorkerRequest) -> WorkerReply {
    let ticket = request.ticket;
    let identity = request.message.identity.clone();
    debug!(task = %identity, ticket, "worker received task");

    let joined = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let task = registry.decode(&request.message)?;
        task.materialize_result(&MaterializeOptions {
            run_on_worker_process: true,
            interactive: request.interactive,
            prefix_command: request.prefix_command,
        })
    })
    .await;

    let error = match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) => Some(format!("task panicked in worker: {e}")),
    };
    if let Some(ref e) = error {
        warn!(task = %identity, ticket, error = %e, "task failed in worker");
    }

    WorkerReply { ticket, error }
}

/// Serve requests from stdin until it is closed.
pub async fn serve_worker(registry: Arc<TaskRegistry>) -> Result<()> {
    info!(pid = std::process::id(), "worker started");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = serde_json::from_str(&line)?;
        let reply = handle_request(Arc::clone(&registry), request).await;

        let mut out = serde_json::to_string(&reply)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("worker input closed; exiting");
    Ok(())
}
