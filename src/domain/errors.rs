//! Domain errors for the conductor orchestration core.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use super::models::worker::WorkerId;

/// Domain-level errors that can occur in the orchestrator.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already registered: {0}")]
    DuplicateWorkflow(String),

    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("Schedule already exists: {0}")]
    DuplicateSchedule(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Orchestrator is shutting down; no new tasks accepted")]
    ShuttingDown,

    #[error("Pool invariant violated: {0}")]
    PoolInvariant(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<PoolError> for DomainError {
    fn from(err: PoolError) -> Self {
        DomainError::PoolInvariant(err.to_string())
    }
}

/// Errors raised by the agent pool when a membership change is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("Pool is at its minimum size ({0})")]
    AtMinimum(usize),

    #[error("Worker {0} is busy")]
    WorkerBusy(WorkerId),

    #[error("Worker {0} is not a member of the pool")]
    UnknownWorker(WorkerId),

    #[error("Worker {worker} is not bound to task {task_id}")]
    NotBound { worker: WorkerId, task_id: Uuid },
}

/// Errors returned by a task executor.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("Task timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Executor panicked: {0}")]
    Panicked(String),

    #[error("Payload mismatch: expected {expected}, got {actual}")]
    PayloadMismatch { expected: String, actual: String },
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors returned by an advisor.
#[derive(Debug, Clone, Error)]
pub enum AdvisorError {
    #[error("Advisor unavailable: {0}")]
    Unavailable(String),

    #[error("Advisor returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors returned by a change source.
#[derive(Debug, Clone, Error)]
pub enum ChangeSourceError {
    #[error("Version control command failed: {0}")]
    CommandFailed(String),

    #[error("Could not parse version control output: {0}")]
    Parse(String),

    #[error("File watch failed: {0}")]
    Watch(String),
}

/// Errors raised while running a workflow step.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("Step timed out after {0:?}")]
    TimedOut(Duration),

    #[error("No step handler registered under '{0}'")]
    UnknownHandler(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
