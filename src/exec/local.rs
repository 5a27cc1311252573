// src/exec/local.rs

//! Inline executor for interactive runs.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use crate::errors::{Result, StaledagError};
use crate::exec::backend::{Completion, ExecutorBackend, Ticket, TicketCounter, WorkUnit};

/// Runs each unit synchronously inside `submit`.
///
/// Nothing runs concurrently, so output appears in order and a debugger
/// attached to the process can step into tasks. `wait_any` never blocks.
#[derive(Debug, Default)]
pub struct LocalExecutor {
    tickets: TicketCounter,
    done: VecDeque<Completion>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutorBackend for LocalExecutor {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        let ticket = self.tickets.next();
        let task = unit.task.identity();
        debug!(task = %task, ticket, "running task inline");

        let outcome = unit.task.materialize_result(&unit.options(false));
        self.done.push_back(Completion { ticket, outcome });
        Ok(ticket)
    }

    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>> {
        Box::pin(async move {
            if self.done.is_empty() {
                return Err(StaledagError::Executor(
                    "wait_any called with no work in flight".to_string(),
                ));
            }
            Ok(self.done.drain(..).collect())
        })
    }
}
