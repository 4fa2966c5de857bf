//! Worker (agent) identity and read-only snapshots.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a pool worker. Allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Point-in-time view of a worker for status output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub busy: bool,
    pub task_id: Option<Uuid>,
    pub tasks_run: u64,
    pub idle_secs: Option<u64>,
}
