//! Workflow definitions and execution records.
//!
//! Steps reference named handlers in the step registry rather than
//! closures, so definitions and executions serialize cleanly into history.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// What caused a workflow to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowTrigger {
    Commit,
    Schedule,
    Manual,
    Failure,
    Deployment,
}

impl WorkflowTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
            Self::Failure => "failure",
            Self::Deployment => "deployment",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "commit" => Some(Self::Commit),
            "schedule" => Some(Self::Schedule),
            "manual" => Some(Self::Manual),
            "failure" => Some(Self::Failure),
            "deployment" => Some(Self::Deployment),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkflowTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Informational tag describing what a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Test,
    Analysis,
    Fix,
    Pr,
    Notify,
    Dashboard,
    Other,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Analysis => "analysis",
            Self::Fix => "fix",
            Self::Pr => "pr",
            Self::Notify => "notify",
            Self::Dashboard => "dashboard",
            Self::Other => "other",
        }
    }
}

/// Accumulated state of a running workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub trigger: Option<WorkflowTrigger>,
    /// Data supplied by whoever triggered the workflow.
    pub data: Value,
    /// Results of completed (non-skipped) steps, keyed by step name.
    pub results: BTreeMap<String, Value>,
    /// Errors of failed steps, keyed by step name.
    pub errors: BTreeMap<String, String>,
}

impl WorkflowContext {
    pub fn new(trigger: WorkflowTrigger, data: Value) -> Self {
        Self {
            trigger: Some(trigger),
            data,
            results: BTreeMap::new(),
            errors: BTreeMap::new(),
        }
    }
}

/// Serializable predicate evaluated against the workflow context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    Always,
    /// A prior step produced a result.
    ContextHas { step: String },
    /// `pointer` into a prior step's result resolves to `true`.
    ContextFlag { step: String, pointer: String },
    /// `pointer` into the trigger data resolves to `true`.
    TriggerDataFlag { pointer: String },
    Not { condition: Box<StepCondition> },
}

impl StepCondition {
    pub fn context_flag(step: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self::ContextFlag {
            step: step.into(),
            pointer: pointer.into(),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            condition: Box::new(self),
        }
    }

    pub fn evaluate(&self, ctx: &WorkflowContext) -> bool {
        match self {
            Self::Always => true,
            Self::ContextHas { step } => ctx.results.contains_key(step),
            Self::ContextFlag { step, pointer } => ctx
                .results
                .get(step)
                .and_then(|value| value.pointer(pointer))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Self::TriggerDataFlag { pointer } => ctx
                .data
                .pointer(pointer)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Self::Not { condition } => !condition.evaluate(ctx),
        }
    }
}

/// A handler invocation run after a step succeeds or fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookDefinition {
    pub handler: String,
    #[serde(default)]
    pub params: Value,
}

impl HookDefinition {
    pub fn new(handler: impl Into<String>, params: Value) -> Self {
        Self {
            handler: handler.into(),
            params,
        }
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    pub kind: StepKind,
    /// Name of the registered step handler to invoke.
    pub handler: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub condition: Option<StepCondition>,
    /// Retries after the first attempt; falls back to the engine default.
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub on_success: Option<HookDefinition>,
    #[serde(default)]
    pub on_failure: Option<HookDefinition>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, kind: StepKind, handler: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            handler: handler.into(),
            params: Value::Null,
            condition: None,
            retry_attempts: None,
            timeout_secs: None,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn on_success(mut self, hook: HookDefinition) -> Self {
        self.on_success = Some(hook);
        self
    }

    pub fn on_failure(mut self, hook: HookDefinition) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// A named sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub trigger: WorkflowTrigger,
    /// Run every step concurrently instead of in order.
    #[serde(default)]
    pub parallel: bool,
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, trigger: WorkflowTrigger) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            trigger,
            parallel: false,
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Structural checks; handler existence is checked by the engine.
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "workflow name cannot be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(DomainError::ValidationFailed(format!(
                "workflow '{}' has no steps",
                self.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(DomainError::ValidationFailed(format!(
                    "workflow '{}' has duplicate step '{}'",
                    self.name, step.name
                )));
            }
        }
        Ok(())
    }
}

/// Status of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `Pending -> Completed` is only legal for skipped steps.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        matches!(
            (self, new_status),
            (Self::Pending, Self::Running | Self::Completed)
                | (Self::Running, Self::Completed | Self::Failed)
        )
    }
}

/// Per-step record within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub skipped: bool,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn pending(step: &StepDefinition) -> Self {
        Self {
            name: step.name.clone(),
            kind: step.kind,
            status: StepStatus::Pending,
            skipped: false,
            attempts: 0,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, to: StepStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("step '{}'", self.name),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> DomainResult<()> {
        self.transition(StepStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn skip(&mut self) -> DomainResult<()> {
        self.transition(StepStatus::Completed)?;
        self.skipped = true;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, result: Value, attempts: u32) -> DomainResult<()> {
        self.transition(StepStatus::Completed)?;
        self.attempts = attempts;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, attempts: u32) -> DomainResult<()> {
        self.transition(StepStatus::Failed)?;
        self.attempts = attempts;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Overall status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One invocation of a workflow. Immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow: String,
    pub trigger: WorkflowTrigger,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub context: WorkflowContext,
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(definition: &WorkflowDefinition, trigger: WorkflowTrigger, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow: definition.name.clone(),
            trigger,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            steps: definition.steps.iter().map(StepRecord::pending).collect(),
            context: WorkflowContext::new(trigger, data),
            error: None,
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    /// Names of steps that never left `pending`.
    pub fn not_run(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        let end = self.completed_at?;
        u64::try_from((end - self.started_at).num_milliseconds()).ok()
    }
}
