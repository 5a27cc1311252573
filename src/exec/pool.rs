// src/exec/pool.rs

//! Fixed-size pool of worker processes.

use std::ffi::OsString;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::errors::{Result, StaledagError};
use crate::exec::backend::{Completion, ExecutorBackend, Ticket, TicketCounter, WorkUnit};
use crate::exec::worker::{WorkerReply, WorkerRequest, WORKER_SUBCOMMAND};

/// How to start one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// This very binary, started with the hidden worker subcommand.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, [WORKER_SUBCOMMAND]))
    }
}

struct Job {
    ticket: Ticket,
    request: WorkerRequest,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Dispatches units to long-lived worker processes.
///
/// Each worker is driven by its own Tokio task that pulls jobs from a shared
/// queue, writes the request to the worker's stdin and waits for the reply
/// on its stdout. A worker that stops answering fails its current job and
/// leaves the pool; when the last one is gone every queued job fails.
pub struct ProcessPoolExecutor {
    jobs_tx: Option<mpsc::UnboundedSender<Job>>,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    tickets: TicketCounter,
    in_flight: usize,
    handles: Vec<JoinHandle<()>>,
}

impl ProcessPoolExecutor {
    /// Start `size` workers. Must be called from within a Tokio runtime.
    pub fn spawn(size: usize, command: WorkerCommand) -> Result<Self> {
        let size = size.max(1);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (done_tx, done_rx) = mpsc::unbounded_channel::<Completion>();
        let queue: JobQueue = Arc::new(Mutex::new(jobs_rx));
        let alive = Arc::new(AtomicUsize::new(size));

        let mut handles = Vec::with_capacity(size);
        for id in 0..size {
            let mut child = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    StaledagError::Executor(format!(
                        "spawning worker {id} ({:?}): {e}",
                        command.program
                    ))
                })?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| StaledagError::Executor(format!("worker {id} has no stdin")))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| StaledagError::Executor(format!("worker {id} has no stdout")))?;

            debug!(worker = id, pid = ?child.id(), "worker process started");
            handles.push(tokio::spawn(worker_loop(
                id,
                child,
                stdin,
                BufReader::new(stdout).lines(),
                Arc::clone(&queue),
                done_tx.clone(),
                Arc::clone(&alive),
            )));
        }

        info!(workers = size, program = ?command.program, "process pool started");
        Ok(Self {
            jobs_tx: Some(jobs_tx),
            done_tx,
            done_rx,
            tickets: TicketCounter::default(),
            in_flight: 0,
            handles,
        })
    }

    /// Close the job queue and wait for every worker to exit.
    pub async fn shutdown(mut self) {
        self.jobs_tx.take();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker driver task failed during shutdown");
            }
        }
    }

    fn fail_now(&mut self, ticket: Ticket, err: anyhow::Error) {
        let _ = self.done_tx.send(Completion {
            ticket,
            outcome: Err(err),
        });
    }
}

impl ExecutorBackend for ProcessPoolExecutor {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        let ticket = self.tickets.next();
        self.in_flight += 1;

        let Some(message) = unit.task.to_message() else {
            self.fail_now(
                ticket,
                anyhow!(
                    "task {} cannot be sent to a worker process (no task message)",
                    unit.task.identity()
                ),
            );
            return Ok(ticket);
        };

        let job = Job {
            ticket,
            request: WorkerRequest {
                ticket,
                message,
                prefix_command: unit.prefix_command,
                interactive: unit.interactive,
            },
        };

        let sent = match &self.jobs_tx {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };
        if !sent {
            self.fail_now(ticket, anyhow!("no worker processes left in the pool"));
        }
        Ok(ticket)
    }

    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>> {
        Box::pin(async move {
            if self.in_flight == 0 {
                return Err(StaledagError::Executor(
                    "wait_any called with no work in flight".to_string(),
                ));
            }

            let first = self.done_rx.recv().await.ok_or_else(|| {
                StaledagError::Executor("completion channel closed".to_string())
            })?;
            let mut done = vec![first];
            while let Ok(c) = self.done_rx.try_recv() {
                done.push(c);
            }

            self.in_flight -= done.len();
            Ok(done)
        })
    }
}

async fn round_trip(
    stdin: &mut ChildStdin,
    stdout: &mut Lines<BufReader<ChildStdout>>,
    request: &WorkerRequest,
) -> anyhow::Result<WorkerReply> {
    let mut line = serde_json::to_string(request).context("encoding worker request")?;
    line.push('\n');
    stdin
        .write_all(line.as_bytes())
        .await
        .context("writing request to worker")?;
    stdin.flush().await.context("flushing worker stdin")?;

    let reply_line = stdout
        .next_line()
        .await
        .context("reading reply from worker")?
        .ok_or_else(|| anyhow!("worker closed its stdout"))?;
    let reply: WorkerReply =
        serde_json::from_str(&reply_line).context("decoding worker reply")?;

    if reply.ticket != request.ticket {
        return Err(anyhow!(
            "worker answered ticket {} while {} was pending",
            reply.ticket,
            request.ticket
        ));
    }
    Ok(reply)
}

async fn worker_loop(
    id: usize,
    mut child: Child,
    mut stdin: ChildStdin,
    mut stdout: Lines<BufReader<ChildStdout>>,
    queue: JobQueue,
    done_tx: mpsc::UnboundedSender<Completion>,
    alive: Arc<AtomicUsize>,
) {
    loop {
        let job = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            debug!(worker = id, "job queue closed");
            break;
        };

        match round_trip(&mut stdin, &mut stdout, &job.request).await {
            Ok(reply) => {
                let outcome = match reply.error {
                    None => Ok(()),
                    Some(e) => Err(anyhow!(e)),
                };
                let _ = done_tx.send(Completion {
                    ticket: job.ticket,
                    outcome,
                });
            }
            Err(e) => {
                error!(worker = id, error = %format!("{e:#}"), "worker process lost");
                let _ = done_tx.send(Completion {
                    ticket: job.ticket,
                    outcome: Err(e.context(format!("worker {id} failed"))),
                });

                if alive.fetch_sub(1, Ordering::SeqCst) == 1 {
                    fail_queued_jobs(&queue, &done_tx).await;
                }
                return;
            }
        }
    }

    drop(stdin);
    match child.wait().await {
        Ok(status) => debug!(worker = id, %status, "worker process exited"),
        Err(e) => warn!(worker = id, error = %e, "failed waiting for worker process"),
    }
}

/// Called by the last surviving worker on its way out.
async fn fail_queued_jobs(queue: &JobQueue, done_tx: &mpsc::UnboundedSender<Completion>) {
    let mut rx = queue.lock().await;
    rx.close();
    while let Ok(job) = rx.try_recv() {
        let _ = done_tx.send(Completion {
            ticket: job.ticket,
            outcome: Err(anyhow!("no worker processes left in the pool")),
        });
    }
}
