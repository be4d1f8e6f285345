//! Schedule trigger for the queue drainer.
//!
//! Calls `POST /api/v1/drain` on a fixed interval so deployments without an
//! in-process schedule still make progress on large batches.

pub mod config;
pub mod trigger;

pub use config::WorkerConfig;
pub use trigger::{DrainResponse, DrainTrigger, TriggerError};
