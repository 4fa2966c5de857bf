//! CLI command implementations.

pub mod daemon;
pub mod history;
pub mod metrics;
pub mod queue;
pub mod schedule;
pub mod workflow;
