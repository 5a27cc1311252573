// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The scheduler talks to an `ExecutorBackend` instead of running tasks
//! itself. Every backend follows the same contract:
//!
//! - `submit` hands over one unit of work and returns a ticket without
//!   waiting for it to finish;
//! - `wait_any` suspends until at least one submitted unit has finished and
//!   returns every completion that is available at that point.
//!
//! Units still in flight after `wait_any` returns are simply the tickets the
//! caller has not seen a completion for yet.
//!
//! Callers can plug in their own backend (for example one that forwards to
//! a remote executor) by implementing this trait.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::Result;
use crate::task::{MaterializeOptions, TaskNode};

/// Handle for a submitted unit of work, unique per backend instance.
pub type Ticket = u64;

/// One node handed to a backend.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub task: Arc<dyn TaskNode>,
    pub prefix_command: Option<String>,
    pub interactive: bool,
}

impl WorkUnit {
    /// Options to pass to `materialize_result` for this unit.
    pub fn options(&self, run_on_worker_process: bool) -> MaterializeOptions {
        MaterializeOptions {
            run_on_worker_process,
            interactive: self.interactive,
            prefix_command: self.prefix_command.clone(),
        }
    }
}

/// Result of one unit of work.
pub struct Completion {
    pub ticket: Ticket,
    pub outcome: anyhow::Result<()>,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match &self.outcome {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("err: {e}"),
        };
        f.debug_struct("Completion")
            .field("ticket", &self.ticket)
            .field("outcome", &outcome)
            .finish()
    }
}

/// Trait abstracting how scheduled work is executed.
pub trait ExecutorBackend: Send {
    /// Start executing `unit`. Must not wait for it to finish.
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket>;

    /// Wait until at least one submitted unit finished.
    ///
    /// Calling this with nothing in flight is an error.
    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>>;
}

impl<E: ExecutorBackend + ?Sized> ExecutorBackend for Box<E> {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        (**self).submit(unit)
    }

    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>> {
        (**self).wait_any()
    }
}

/// Monotonic ticket source shared by the bundled backends.
#[derive(Debug, Default)]
pub(crate) struct TicketCounter {
    next: Ticket,
}

impl TicketCounter {
    pub(crate) fn next(&mut self) -> Ticket {
        let t = self.next;
        self.next += 1;
        t
    }
}
