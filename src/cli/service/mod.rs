//! Process-level plumbing shared by the CLI commands.
//!
//! Each CLI invocation is a separate process, so a running `start` daemon
//! publishes its pid and a periodic status snapshot under the state
//! directory for the other commands to read.

mod daemon_state;
mod runtime;
mod snapshot;

pub use daemon_state::DaemonState;
pub use runtime::{build_orchestrator, load_config, start_in_process, RuntimeOptions};
pub use snapshot::StatusSnapshot;
