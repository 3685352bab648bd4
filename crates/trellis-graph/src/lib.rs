//! Step graph orchestration — named steps over shared typed state.
//!
//! A pipeline is a directed graph of [`Step`]s. Each step borrows the
//! state, does its work (possibly fanning out concurrent calls through a
//! capability), and the executor follows edges — unconditional or routed
//! by a [`Route`]-returning function — until a step with no outgoing edge.
//!
//! The [`batch`] module provides the partition / dispatch / evaluate /
//! retry / aggregate primitives used by batch pipelines; the loop itself is
//! wired as ordinary graph steps with one bounded cycle.

pub mod batch;
pub mod edge;
pub mod executor;
pub mod step;

pub use batch::{dispatch_pending, evaluate_results, partition, BatchJob, RetryController};
pub use edge::{Route, Router};
pub use executor::{Graph, GraphBuilder};
pub use step::{FnStep, NoopStep, Step};
