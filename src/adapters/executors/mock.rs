//! Mock executor for testing.
//!
//! Behaviour is configured per task kind: a fixed delay, a standing
//! failure, a panic, or a script of per-call results consumed in order.
//! Every call is recorded so tests can assert on ordering and concurrency.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::ExecutorError;
use crate::domain::models::{
    AnalysisOutcome, AnalysisPayload, FixOutcome, FixPayload, ReportOutcome, ReportPayload,
    TaskKind, TestOutcome, TestPayload, WorkerId,
};
use crate::domain::ports::{ExecutionContext, TaskExecutor};

/// One recorded executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub kind: TaskKind,
    pub task_id: Uuid,
    pub worker: WorkerId,
}

#[derive(Debug, Clone)]
struct MockConfig {
    delay: Duration,
    honor_cancellation: bool,
    failures: HashMap<TaskKind, String>,
    panics: HashSet<TaskKind>,
    test_outcome: TestOutcome,
    analysis_outcome: AnalysisOutcome,
    fix_outcome: FixOutcome,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            honor_cancellation: true,
            failures: HashMap::new(),
            panics: HashSet::new(),
            test_outcome: TestOutcome {
                passed: 1,
                ..TestOutcome::default()
            },
            analysis_outcome: AnalysisOutcome {
                summary: "no issues found".to_string(),
                ..AnalysisOutcome::default()
            },
            fix_outcome: FixOutcome {
                applied: true,
                description: "mock fix applied".to_string(),
                ..FixOutcome::default()
            },
        }
    }
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<MockCall>,
    active: usize,
    max_active: usize,
    active_workers: HashSet<WorkerId>,
    worker_overlap: bool,
    scripts: HashMap<TaskKind, VecDeque<Result<(), String>>>,
}

/// Decrements the active counters even if the call panics or is aborted.
struct ActiveGuard {
    recorder: Arc<Mutex<Recorder>>,
    worker: WorkerId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut recorder) = self.recorder.lock() {
            recorder.active = recorder.active.saturating_sub(1);
            recorder.active_workers.remove(&self.worker);
        }
    }
}

/// Mock executor for testing.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    config: MockConfig,
    recorder: Arc<Mutex<Recorder>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every call before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Keep sleeping through cancellation requests.
    pub fn ignoring_cancellation(mut self) -> Self {
        self.config.honor_cancellation = false;
        self
    }

    /// Fail every call of `kind` with `message`.
    pub fn failing_kind(mut self, kind: TaskKind, message: impl Into<String>) -> Self {
        self.config.failures.insert(kind, message.into());
        self
    }

    /// Panic on every call of `kind`.
    pub fn panicking_kind(mut self, kind: TaskKind) -> Self {
        self.config.panics.insert(kind);
        self
    }

    pub fn with_test_outcome(mut self, outcome: TestOutcome) -> Self {
        self.config.test_outcome = outcome;
        self
    }

    pub fn with_analysis_outcome(mut self, outcome: AnalysisOutcome) -> Self {
        self.config.analysis_outcome = outcome;
        self
    }

    pub fn with_fix_outcome(mut self, outcome: FixOutcome) -> Self {
        self.config.fix_outcome = outcome;
        self
    }

    /// Queue per-call results for `kind`; `Err` entries fail that call.
    /// Once the script runs out the standing configuration applies.
    pub fn with_script(
        self,
        kind: TaskKind,
        results: impl IntoIterator<Item = Result<(), String>>,
    ) -> Self {
        if let Ok(mut recorder) = self.recorder.lock() {
            recorder.scripts.entry(kind).or_default().extend(results);
        }
        self
    }

    /// Every call made so far, in invocation order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.recorder.lock().map(|r| r.calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, kind: TaskKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    /// Highest number of calls that were in progress at once.
    pub fn max_concurrent(&self) -> usize {
        self.recorder.lock().map(|r| r.max_active).unwrap_or_default()
    }

    /// True if one worker was ever running two calls at the same time.
    pub fn worker_overlap_detected(&self) -> bool {
        self.recorder.lock().map(|r| r.worker_overlap).unwrap_or_default()
    }

    fn begin(&self, kind: TaskKind, ctx: &ExecutionContext) -> (ActiveGuard, Option<Result<(), String>>) {
        let scripted = match self.recorder.lock() {
            Ok(mut recorder) => {
                recorder.calls.push(MockCall {
                    kind,
                    task_id: ctx.task_id,
                    worker: ctx.worker,
                });
                recorder.active += 1;
                recorder.max_active = recorder.max_active.max(recorder.active);
                if !recorder.active_workers.insert(ctx.worker) {
                    recorder.worker_overlap = true;
                }
                recorder.scripts.get_mut(&kind).and_then(VecDeque::pop_front)
            }
            Err(_) => None,
        };
        let guard = ActiveGuard {
            recorder: Arc::clone(&self.recorder),
            worker: ctx.worker,
        };
        (guard, scripted)
    }

    async fn perform(&self, kind: TaskKind, ctx: &ExecutionContext) -> Result<(), ExecutorError> {
        let (_guard, scripted) = self.begin(kind, ctx);

        if !self.config.delay.is_zero() {
            if self.config.honor_cancellation {
                tokio::select! {
                    () = tokio::time::sleep(self.config.delay) => {}
                    () = ctx.cancel.cancelled() => return Err(ExecutorError::Cancelled),
                }
            } else {
                tokio::time::sleep(self.config.delay).await;
            }
        }
        if self.config.honor_cancellation {
            ctx.checkpoint()?;
        }

        if self.config.panics.contains(&kind) {
            panic!("mock executor configured to panic on {kind} tasks");
        }
        if let Some(result) = scripted {
            return result.map_err(ExecutorError::Failed);
        }
        match self.config.failures.get(&kind) {
            Some(message) => Err(ExecutorError::failed(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TaskExecutor for MockExecutor {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn run_test(
        &self,
        _payload: &TestPayload,
        ctx: &ExecutionContext,
    ) -> Result<TestOutcome, ExecutorError> {
        self.perform(TaskKind::Test, ctx).await?;
        Ok(self.config.test_outcome.clone())
    }

    async fn run_analysis(
        &self,
        _payload: &AnalysisPayload,
        ctx: &ExecutionContext,
    ) -> Result<AnalysisOutcome, ExecutorError> {
        self.perform(TaskKind::Analysis, ctx).await?;
        Ok(self.config.analysis_outcome.clone())
    }

    async fn run_fix(
        &self,
        payload: &FixPayload,
        ctx: &ExecutionContext,
    ) -> Result<FixOutcome, ExecutorError> {
        self.perform(TaskKind::Fix, ctx).await?;
        let mut outcome = self.config.fix_outcome.clone();
        if outcome.files_changed.is_empty() {
            outcome.files_changed.clone_from(&payload.files);
        }
        Ok(outcome)
    }

    async fn run_report(
        &self,
        payload: &ReportPayload,
        ctx: &ExecutionContext,
    ) -> Result<ReportOutcome, ExecutorError> {
        self.perform(TaskKind::Report, ctx).await?;
        Ok(ReportOutcome {
            location: None,
            summary: format!("{} ({} sections)", payload.title, payload.sections.len()),
        })
    }
}
