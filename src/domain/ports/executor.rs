//! Executor port - the boundary where task content is actually performed.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::ExecutorError;
use crate::domain::models::{
    AnalysisOutcome, AnalysisPayload, FixOutcome, FixPayload, ReportOutcome, ReportPayload,
    TaskOutcome, TaskPayload, TaskPriority, TestOutcome, TestPayload, WorkerId,
};

/// Per-invocation context handed to an executor.
///
/// Cancellation is cooperative: executors should poll [`is_cancelled`]
/// (or await `cancel.cancelled()`) at safe points and return
/// [`ExecutorError::Cancelled`] when asked to stop.
///
/// [`is_cancelled`]: ExecutionContext::is_cancelled
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: Uuid,
    pub worker: WorkerId,
    pub priority: TaskPriority,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(task_id: Uuid, worker: WorkerId, priority: TaskPriority) -> Self {
        Self {
            task_id,
            worker,
            priority,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `Err(Cancelled)` once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), ExecutorError> {
        if self.is_cancelled() {
            Err(ExecutorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trait implemented by external collaborators that perform task work.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executor name for logging.
    fn name(&self) -> &'static str;

    async fn run_test(
        &self,
        payload: &TestPayload,
        ctx: &ExecutionContext,
    ) -> Result<TestOutcome, ExecutorError>;

    async fn run_analysis(
        &self,
        payload: &AnalysisPayload,
        ctx: &ExecutionContext,
    ) -> Result<AnalysisOutcome, ExecutorError>;

    async fn run_fix(
        &self,
        payload: &FixPayload,
        ctx: &ExecutionContext,
    ) -> Result<FixOutcome, ExecutorError>;

    async fn run_report(
        &self,
        payload: &ReportPayload,
        ctx: &ExecutionContext,
    ) -> Result<ReportOutcome, ExecutorError>;
}

/// Route a payload to the matching executor operation.
pub async fn execute_payload(
    executor: &dyn TaskExecutor,
    payload: &TaskPayload,
    ctx: &ExecutionContext,
) -> Result<TaskOutcome, ExecutorError> {
    match payload {
        TaskPayload::Test(p) => executor.run_test(p, ctx).await.map(TaskOutcome::Test),
        TaskPayload::Analysis(p) => executor.run_analysis(p, ctx).await.map(TaskOutcome::Analysis),
        TaskPayload::Fix(p) => executor.run_fix(p, ctx).await.map(TaskOutcome::Fix),
        TaskPayload::Report(p) => executor.run_report(p, ctx).await.map(TaskOutcome::Report),
    }
}
