//! Adapters implementing the domain ports against real systems.

pub mod advisors;
pub mod executors;
pub mod merge_gate;
pub mod vcs;

pub use advisors::HeuristicAdvisor;
pub use executors::{CommandExecutor, MockExecutor};
pub use merge_gate::{FileMergeGate, InMemoryMergeGate};
pub use vcs::{GitChangeSource, NotifyFileWatcher};
