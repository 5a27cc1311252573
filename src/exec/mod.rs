// src/exec/mod.rs

//! Execution backends.
//!
//! The scheduler decides *what* may run; the types here decide *where*:
//!
//! - [`backend`] defines the `ExecutorBackend` trait every backend implements.
//! - [`local`] runs tasks inline, one after the other (interactive runs).
//! - [`threaded`] runs tasks on a bounded set of blocking threads.
//! - [`pool`] ships tasks to long-lived worker processes.
//! - [`worker`] is the other end of the pool protocol.

pub mod backend;
pub mod local;
pub mod pool;
pub mod threaded;
pub mod worker;

pub use backend::{Completion, ExecutorBackend, Ticket, WorkUnit};
pub use local::LocalExecutor;
pub use pool::{ProcessPoolExecutor, WorkerCommand};
pub use threaded::ThreadedExecutor;
pub use worker::{serve_worker, WorkerReply, WorkerRequest, WORKER_SUBCOMMAND};
