//! Rules that map task lifecycle outcomes to workflows.

use serde::{Deserialize, Serialize};

use super::task::{Task, TaskKind, TaskPriority};

/// The terminal lifecycle event a rule reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Completed,
    Failed,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One row of the workflow selection table. Unset filters match anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub on: LifecycleEvent,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Only match tasks that carry a result.
    #[serde(default)]
    pub requires_result: bool,
    pub workflow: String,
}

impl PolicyRule {
    pub fn new(on: LifecycleEvent, workflow: impl Into<String>) -> Self {
        Self {
            on,
            kind: None,
            priority: None,
            requires_result: false,
            workflow: workflow.into(),
        }
    }

    pub fn for_kind(mut self, kind: TaskKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn for_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_result(mut self) -> Self {
        self.requires_result = true;
        self
    }

    pub fn matches(&self, event: LifecycleEvent, task: &Task) -> bool {
        self.on == event
            && self.kind.is_none_or(|k| k == task.kind)
            && self.priority.is_none_or(|p| p == task.priority)
            && (!self.requires_result || task.result.is_some())
    }
}

/// Built-in selection table; the first matching row wins.
pub fn default_policy_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule::new(LifecycleEvent::Completed, "continuous-monitoring")
            .for_kind(TaskKind::Test)
            .with_result(),
        PolicyRule::new(LifecycleEvent::Failed, "auto-fix-and-pr").for_priority(TaskPriority::Critical),
        PolicyRule::new(LifecycleEvent::Failed, "regression-detection"),
    ]
}
