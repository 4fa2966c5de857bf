//! Status snapshot the daemon writes for other CLI invocations.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DaemonState;
use crate::domain::models::{Config, Task, WorkflowExecution};
use crate::services::{Orchestrator, OrchestratorStatus, ScheduleView};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub written_at: DateTime<Utc>,
    pub status: OrchestratorStatus,
    pub schedules: Vec<ScheduleView>,
    pub workflow_history: Vec<WorkflowExecution>,
    pub task_history: Vec<Task>,
}

impl StatusSnapshot {
    /// Capture the orchestrator's current state, keeping the last `history_limit` records.
    pub async fn capture(orchestrator: &Orchestrator, history_limit: usize) -> Result<Self> {
        Ok(Self {
            written_at: Utc::now(),
            status: orchestrator.status().await?,
            schedules: orchestrator.scheduler().list().await,
            workflow_history: orchestrator.engine().execution_history(history_limit).await,
            task_history: orchestrator.dispatcher().history(history_limit).await,
        })
    }

    /// Write through a temporary file so readers never see a partial snapshot.
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_vec_pretty(self).context("Failed to serialize status snapshot")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))
    }

    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse status snapshot {}", path.display()))?;
        Ok(Some(snapshot))
    }

    /// The latest snapshot of a running daemon. `None` when no daemon is
    /// alive or it has not written a snapshot yet.
    pub async fn read_live(config: &Config) -> Result<Option<(DaemonState, Self)>> {
        let Some(daemon) = DaemonState::read_live(&config.daemon_state_path())? else {
            return Ok(None);
        };
        Ok(Self::read(&config.status_snapshot_path())
            .await?
            .map(|snapshot| (daemon, snapshot)))
    }

    pub async fn remove(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
