// src/dag/mod.rs

//! The task graph and the passes run over it.
//!
//! - [`builder`] walks prerequisites from the roots into a [`TaskGraph`].
//! - [`graph`] holds the graph itself (petgraph `StableDiGraph`).
//! - [`staleness`] marks which nodes need to run again.
//! - [`reduce`] drops fresh nodes and redundant edges.
//! - [`channels`] groups nodes by their channel labels.
//! - [`scheduler`] drains the graph through an executor backend.

pub mod builder;
pub mod channels;
pub mod graph;
pub mod reduce;
pub mod scheduler;
pub mod staleness;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{build_graph, GraphBuilder};
pub use channels::{group_by_labels, ChannelGroups};
pub use graph::{GraphNode, TaskGraph};
pub use reduce::{prune_fresh, reduce, transitive_reduction, ReductionReport};
pub use scheduler::{ScheduleReport, Scheduler, SchedulerOptions};
pub use staleness::{analyze, StalenessReport};
