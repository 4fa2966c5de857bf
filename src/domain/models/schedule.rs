//! Cron schedule entries and their rolling execution history.

use std::collections::VecDeque;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{TaskKind, TaskPayload, TaskPriority, TestPayload};
use crate::domain::errors::{DomainError, DomainResult};

/// A recurring trigger that enqueues a task on a cron cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    /// Five-field (minute first) or six/seven-field (seconds first) cron.
    pub cron: String,
    pub kind: TaskKind,
    /// Payload template; an empty payload of `kind` is used when absent.
    #[serde(default)]
    pub payload: Option<TaskPayload>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
}

fn default_true() -> bool {
    true
}

impl ScheduleEntry {
    pub fn new(name: impl Into<String>, cron: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            name: name.into(),
            cron: cron.into(),
            kind,
            payload: None,
            priority: TaskPriority::default(),
            enabled: true,
            description: String::new(),
        }
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Payload used for each fired task.
    pub fn task_payload(&self) -> TaskPayload {
        self.payload
            .clone()
            .unwrap_or_else(|| TaskPayload::default_for(self.kind))
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "schedule name cannot be empty".to_string(),
            ));
        }
        parse_cron(&self.cron)?;
        self.task_payload().validate_for(self.kind)
    }
}

/// The two schedules every installation starts with.
pub fn default_schedules() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new("hourly-smoke-tests", "0 * * * *", TaskKind::Test)
            .with_payload(TaskPayload::Test(TestPayload {
                suite: None,
                files: vec![],
                tags: vec!["smoke".to_string()],
            }))
            .with_priority(TaskPriority::Medium)
            .with_description("Run smoke tests every hour"),
        ScheduleEntry::new("daily-full-suite", "0 0 * * *", TaskKind::Test)
            .with_payload(TaskPayload::Test(TestPayload {
                suite: None,
                files: vec![],
                tags: vec!["all".to_string()],
            }))
            .with_priority(TaskPriority::High)
            .with_description("Run the full suite at midnight"),
    ]
}

/// Prefix a seconds field onto five-field expressions.
pub fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

pub fn parse_cron(expression: &str) -> DomainResult<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron(expression)).map_err(|e| DomainError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Final status of one schedule fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRunStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl ScheduleRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Record of a single schedule fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleExecution {
    pub schedule: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ScheduleRunStatus,
    pub task_id: Option<Uuid>,
    pub error: Option<String>,
}

impl ScheduleExecution {
    pub fn started(schedule: impl Into<String>, task_id: Option<Uuid>) -> Self {
        Self {
            schedule: schedule.into(),
            started_at: Utc::now(),
            completed_at: None,
            status: ScheduleRunStatus::Running,
            task_id,
            error: None,
        }
    }

    pub fn finish(&mut self, status: ScheduleRunStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let end = self.completed_at?;
        u64::try_from((end - self.started_at).num_milliseconds()).ok()
    }
}

/// Bounded window of recent executions plus lifetime counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleHistory {
    window: usize,
    records: VecDeque<ScheduleExecution>,
    total_executions: u64,
}

impl ScheduleHistory {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            records: VecDeque::with_capacity(window.max(1)),
            total_executions: 0,
        }
    }

    pub fn push(&mut self, execution: ScheduleExecution) {
        if self.records.len() == self.window {
            self.records.pop_front();
        }
        self.records.push_back(execution);
        self.total_executions += 1;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn total_executions(&self) -> u64 {
        self.total_executions
    }

    /// Recent executions, oldest first.
    pub fn records(&self) -> Vec<ScheduleExecution> {
        self.records.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<&ScheduleExecution> {
        self.records.back()
    }

    /// Fraction of successful runs in the window; `None` when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> Option<f64> {
        if self.records.is_empty() {
            return None;
        }
        let successes = self.records.iter().filter(|r| r.status.is_success()).count();
        Some(successes as f64 / self.records.len() as f64)
    }

    pub fn avg_duration_ms(&self) -> Option<u64> {
        let durations: Vec<u64> = self.records.iter().filter_map(ScheduleExecution::duration_ms).collect();
        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<u64>() / durations.len() as u64)
    }

    pub fn stats(&self) -> ScheduleStats {
        ScheduleStats {
            total_executions: self.total_executions,
            success_rate: self.success_rate(),
            avg_duration_ms: self.avg_duration_ms(),
            last_execution: self.last().map(|r| r.started_at),
        }
    }
}

/// Aggregate statistics for one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStats {
    pub total_executions: u64,
    pub success_rate: Option<f64>,
    pub avg_duration_ms: Option<u64>,
    pub last_execution: Option<DateTime<Utc>>,
}

/// A cadence recommendation from the advisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceSuggestion {
    pub cron_expression: String,
    pub reason: String,
}
