//! Port trait definitions (Hexagonal Architecture)
//!
//! Interfaces the core consumes and adapters implement:
//! - TaskExecutor: performs task work
//! - Advisor: change impact and cadence recommendations
//! - ChangeSource: version-control polling
//! - FileEventSource: working-tree file events
//! - MergeGate: merge-block marker storage
//! - TaskSink: enqueue/status access to the dispatcher
//! - StepHandler: registered workflow step behaviour

pub mod advisor;
pub mod change_source;
pub mod executor;
pub mod file_events;
pub mod merge_gate;
pub mod step_handler;
pub mod task_sink;

pub use advisor::Advisor;
pub use change_source::ChangeSource;
pub use executor::{execute_payload, ExecutionContext, TaskExecutor};
pub use file_events::FileEventSource;
pub use merge_gate::MergeGate;
pub use step_handler::{StepHandler, StepInput};
pub use task_sink::{TaskRequest, TaskSink};
