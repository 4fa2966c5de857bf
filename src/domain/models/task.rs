//! Task domain model.
//!
//! A task is a single unit of work with a kind, a priority and a payload
//! whose shape is tied to the kind. Tasks move monotonically through
//! `queued -> running -> completed | failed`, with `cancelled` reachable
//! from either non-terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::outcome::TaskOutcome;
use super::worker::WorkerId;
use crate::domain::errors::{DomainError, DomainResult};

/// The kind of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Test,
    Analysis,
    Fix,
    Report,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [Self::Test, Self::Analysis, Self::Fix, Self::Report];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Analysis => "analysis",
            Self::Fix => "fix",
            Self::Report => "report",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "test" => Some(Self::Test),
            "analysis" => Some(Self::Analysis),
            "fix" => Some(Self::Fix),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority level for tasks. Higher variants are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    #[serde(alias = "normal")]
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "normal" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Numeric rank used by the priority queue.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status. No status leads back to `Queued`.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            Self::Queued => vec![Self::Running, Self::Cancelled],
            Self::Running => vec![Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a task originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum TaskSource {
    /// Submitted directly through the API or CLI.
    Direct,
    /// Fired by the named schedule.
    Schedule(String),
    /// Produced by the change watcher for the given commit.
    ChangeWatcher(String),
    /// Produced by the change watcher for a working-tree path.
    FileWatch(String),
    /// Enqueued by a step of the named workflow.
    Workflow(String),
}

impl Default for TaskSource {
    fn default() -> Self {
        Self::Direct
    }
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Schedule(_) => "schedule",
            Self::ChangeWatcher(_) => "change_watcher",
            Self::FileWatch(_) => "file_watch",
            Self::Workflow(_) => "workflow",
        }
    }

    /// Workflow-produced tasks never trigger further workflows.
    pub fn triggers_workflows(&self) -> bool {
        !matches!(self, Self::Workflow(_))
    }
}

/// Payload for a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestPayload {
    pub suite: Option<String>,
    pub files: Vec<String>,
    pub tags: Vec<String>,
}

/// Payload for an analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisPayload {
    pub target: Option<String>,
    pub files: Vec<String>,
    pub reason: Option<String>,
}

/// Payload for a fix attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixPayload {
    pub task_id: Option<Uuid>,
    pub error: Option<String>,
    pub files: Vec<String>,
}

/// Payload for report generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub title: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

impl Default for ReportPayload {
    fn default() -> Self {
        Self {
            title: "Test report".to_string(),
            sections: Vec::new(),
        }
    }
}

/// Task payload, discriminated by task kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Test(TestPayload),
    Analysis(AnalysisPayload),
    Fix(FixPayload),
    Report(ReportPayload),
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Test(_) => TaskKind::Test,
            Self::Analysis(_) => TaskKind::Analysis,
            Self::Fix(_) => TaskKind::Fix,
            Self::Report(_) => TaskKind::Report,
        }
    }

    /// An empty payload of the given kind.
    pub fn default_for(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Test => Self::Test(TestPayload::default()),
            TaskKind::Analysis => Self::Analysis(AnalysisPayload::default()),
            TaskKind::Fix => Self::Fix(FixPayload::default()),
            TaskKind::Report => Self::Report(ReportPayload::default()),
        }
    }

    /// Check the payload is usable for a task of `kind`.
    pub fn validate_for(&self, kind: TaskKind) -> DomainResult<()> {
        if self.kind() != kind {
            return Err(DomainError::ValidationFailed(format!(
                "payload of kind '{}' cannot be used for a '{}' task",
                self.kind(),
                kind
            )));
        }
        if let Self::Report(report) = self {
            if report.title.trim().is_empty() {
                return Err(DomainError::ValidationFailed(
                    "report payload requires a title".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Files referenced by the payload, if any.
    pub fn files(&self) -> &[String] {
        match self {
            Self::Test(p) => &p.files,
            Self::Analysis(p) => &p.files,
            Self::Fix(p) => &p.files,
            Self::Report(_) => &[],
        }
    }
}

/// A unit of work tracked by the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub status: TaskStatus,
    pub source: TaskSource,
    /// Set once at dispatch time, never reassigned.
    pub worker: Option<WorkerId>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutcome>,
    pub error: Option<String>,
}

impl Task {
    /// Create a queued task, rejecting payloads that do not match `kind`.
    pub fn new(kind: TaskKind, priority: TaskPriority, payload: TaskPayload) -> DomainResult<Self> {
        payload.validate_for(kind)?;
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            priority,
            payload,
            status: TaskStatus::Queued,
            source: TaskSource::Direct,
            worker: None,
            enqueued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        })
    }

    pub fn with_source(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_transition_to(&self, new_status: TaskStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Bind the task to a worker. A task may only ever be assigned once.
    pub fn assign(&mut self, worker: WorkerId) -> DomainResult<()> {
        if let Some(existing) = self.worker {
            return Err(DomainError::InvalidStateTransition {
                from: existing.to_string(),
                to: worker.to_string(),
                reason: format!("task {} is already assigned", self.id),
            });
        }
        self.worker = Some(worker);
        Ok(())
    }

    /// Transition to a new status, stamping start/end times.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> DomainResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
                reason: format!("task {}", self.id),
            });
        }

        self.status = new_status;
        let now = Utc::now();
        if new_status == TaskStatus::Running {
            self.started_at = Some(now);
        } else if new_status.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    pub fn complete(&mut self, outcome: TaskOutcome) -> DomainResult<()> {
        self.transition_to(TaskStatus::Completed)?;
        self.result = Some(outcome);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> DomainResult<()> {
        self.transition_to(TaskStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        self.transition_to(TaskStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Wall-clock run time, available once the task has started and ended.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.started_at?, self.completed_at?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }
}
