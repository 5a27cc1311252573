// src/exec/threaded.rs

//! In-process executor backed by Tokio's blocking thread pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error};

use crate::errors::{Result, StaledagError};
use crate::exec::backend::{Completion, ExecutorBackend, Ticket, TicketCounter, WorkUnit};

/// Runs units on blocking threads, at most `workers` at a time.
///
/// Each submission spawns a small Tokio task that waits for a permit, runs
/// the unit on a blocking thread, and reports back over an mpsc channel.
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct ThreadedExecutor {
    permits: Arc<Semaphore>,
    tickets: TicketCounter,
    done_tx: mpsc::UnboundedSender<Completion>,
    done_rx: mpsc::UnboundedReceiver<Completion>,
    in_flight: usize,
}

impl ThreadedExecutor {
    pub fn new(workers: usize) -> Self {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tickets: TicketCounter::default(),
            done_tx,
            done_rx,
            in_flight: 0,
        }
    }
}

impl ExecutorBackend for ThreadedExecutor {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        let ticket = self.tickets.next();
        let permits = Arc::clone(&self.permits);
        let done_tx = self.done_tx.clone();

        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(permit) => {
                    let task = Arc::clone(&unit.task);
                    let options = unit.options(false);
                    debug!(task = %task.identity(), ticket, "running task on worker thread");
                    let joined =
                        tokio::task::spawn_blocking(move || task.materialize_result(&options))
                            .await;
                    drop(permit);
                    match joined {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(ticket, error = %e, "task thread panicked");
                            Err(anyhow!("task thread panicked: {e}"))
                        }
                    }
                }
                Err(e) => Err(anyhow!("executor shut down: {e}")),
            };

            let _ = done_tx.send(Completion { ticket, outcome });
        });

        self.in_flight += 1;
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
