use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use staledag::errors::{Result, StaledagError};
use staledag::exec::{Completion, ExecutorBackend, Ticket, WorkUnit};
use staledag::task::Identity;

/// One `submit` call as seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub identity: Identity,
    pub channel: String,
    pub prefix_command: Option<String>,
}

/// Wraps another backend and records every submission, in order.
pub struct RecordingExecutor<E> {
    inner: E,
    submitted: Arc<Mutex<Vec<Submission>>>,
}

impl<E: ExecutorBackend> RecordingExecutor<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            submitted: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the log; stays valid after the executor is dropped.
    pub fn log(&self) -> Arc<Mutex<Vec<Submission>>> {
        Arc::clone(&self.submitted)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submitted.lock().unwrap().clone()
    }
}

impl<E: ExecutorBackend> ExecutorBackend for RecordingExecutor<E> {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        {
            let mut guard = self.submitted.lock().unwrap();
            guard.push(Submission {
                identity: unit.task.identity(),
                channel: unit.task.labels().to_string(),
                prefix_command: unit.prefix_command.clone(),
            });
        }
        self.inner.submit(unit)
    }

    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>> {
        self.inner.wait_any()
    }
}

/// An "external" executor that completes work in a pseudo-random order.
///
/// Submitted units are parked; each `wait_any` picks between one and all of
/// them using a seeded xorshift generator, runs them, and returns their
/// completions. Everything parked counts as in flight, which makes
/// budget violations and premature submissions observable:
/// - [`ShuffledExecutor::max_in_flight`] per channel,
/// - [`ShuffledExecutor::violations`] for units submitted while one of
///   their prerequisites was still parked or unseen-but-later-submitted.
pub struct ShuffledExecutor {
    state: u64,
    next_ticket: Ticket,
    parked: Vec<(Ticket, WorkUnit)>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
    submitted: HashSet<Identity>,
    completed: HashSet<Identity>,
    prerequisites: HashMap<Identity, Vec<Identity>>,
    violations: Vec<String>,
    order: Vec<Identity>,
}

impl ShuffledExecutor {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
            next_ticket: 0,
            parked: Vec::new(),
            in_flight: HashMap::new(),
            max_in_flight: HashMap::new(),
            submitted: HashSet::new(),
            completed: HashSet::new(),
            prerequisites: HashMap::new(),
            violations: Vec::new(),
            order: Vec::new(),
        }
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn max_in_flight(&self, channel: &str) -> usize {
        self.max_in_flight.get(channel).copied().unwrap_or(0)
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Identities in submission order.
    pub fn order(&self) -> &[Identity] {
        &self.order
    }
}

impl ExecutorBackend for ShuffledExecutor {
    fn submit(&mut self, unit: WorkUnit) -> Result<Ticket> {
        let identity = unit.task.identity();
        let prereqs: Vec<Identity> = unit
            .task
            .prerequisites()
            .map_err(StaledagError::Other)?
            .values()
            .map(|p| p.identity())
            .collect();

        for p in prereqs.iter() {
            if self.submitted.contains(p) && !self.completed.contains(p) {
                self.violations
                    .push(format!("{identity} submitted while {p} was still running"));
            }
        }
        for (other, their_prereqs) in self.prerequisites.iter() {
            if their_prereqs.contains(&identity) {
                self.violations
                    .push(format!("{identity} submitted after its dependent {other}"));
            }
        }
        self.prerequisites.insert(identity.clone(), prereqs);
        self.submitted.insert(identity.clone());
        self.order.push(identity);

        for channel in unit.task.labels().iter() {
            let n = self.in_flight.entry(channel.to_string()).or_insert(0);
            *n += 1;
            let now = *n;
            let max = self.max_in_flight.entry(channel.to_string()).or_insert(0);
            *max = (*max).max(now);
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.parked.push((ticket, unit));
        Ok(ticket)
    }

    fn wait_any(&mut self) -> Pin<Box<dyn Future<Output = Result<Vec<Completion>>> + Send + '_>> {
        Box::pin(async move {
            if self.parked.is_empty() {
                return Err(StaledagError::Executor("nothing parked".to_string()));
            }

            let batch = 1 + (self.next_random() as usize) % self.parked.len();
            let mut done = Vec::with_capacity(batch);
            for _ in 0..batch {
                let pick = (self.next_random() as usize) % self.parked.len();
                let (ticket, unit) = self.parked.swap_remove(pick);
                let outcome = unit.task.materialize_result(&unit.options(false));

                for channel in unit.task.labels().iter() {
                    if let Some(n) = self.in_flight.get_mut(channel) {
                        *n -= 1;
                    }
                }
                if outcome.is_ok() {
                    self.completed.insert(unit.task.identity());
                }
                done.push(Completion { ticket, outcome });
            }
            Ok(done)
        })
    }
}
