//! Change watcher.
//!
//! Polls a [`ChangeSource`] for new commits, asks the advisor to assess
//! each one and enqueues a test task sized to the assessed severity. Risky
//! changes are waited on; if their checks fail a merge-block marker is
//! recorded through the [`MergeGate`].
//!
//! Working-tree file events are handled without the advisor: edits under a
//! critical path queue a quick validation run and deleted source files
//! queue an import check.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::event_bus::{EventBus, EventPayload, EventSeverity};
use super::event_factory;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AnalysisPayload, ChangeAssessment, ChangeType, CommitInfo, FileChange, MergeBlock, Severity,
    TaskPayload, TaskPriority, TaskSource, TaskStatus, TestPayload, WatcherConfig, WorkflowConfig,
};
use crate::domain::ports::{Advisor, ChangeSource, MergeGate, TaskRequest, TaskSink};

/// Extensions whose deletion can break imports elsewhere.
const SOURCE_EXTENSIONS: &[&str] = &["rs", "ts", "js", "py"];

pub const BROKEN_IMPORTS_REASON: &str = "check-broken-imports";

/// Suite run when a critical file changes in the working tree.
pub const QUICK_VALIDATION_SUITE: &str = "quick-validation";

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub block_timeout: Duration,
    pub protected_branches: Vec<String>,
    pub block_on_critical_failure: bool,
    pub critical_paths: Vec<String>,
    pub debounce: Duration,
}

impl WatcherSettings {
    pub fn from_config(watcher: &WatcherConfig, workflow: &WorkflowConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(watcher.poll_interval_secs),
            block_timeout: Duration::from_secs(watcher.block_timeout_secs),
            protected_branches: watcher.protected_branches.clone(),
            block_on_critical_failure: workflow.block_on_critical_failure,
            critical_paths: watcher.critical_paths.clone(),
            debounce: Duration::from_millis(watcher.debounce_ms),
        }
    }
}

/// Result of waiting on a blocking check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BlockOutcome {
    Passed,
    Blocked(MergeBlock),
    /// The check did not finish in time; no marker is set.
    TimedOut,
}

/// Everything the watcher did for one commit.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeReport {
    pub commit: String,
    pub assessment: ChangeAssessment,
    pub task_id: Uuid,
    pub followup_task_ids: Vec<Uuid>,
    pub block: Option<BlockOutcome>,
}

pub struct ChangeWatcher {
    source: Arc<dyn ChangeSource>,
    advisor: Arc<dyn Advisor>,
    sink: Arc<dyn TaskSink>,
    gate: Arc<dyn MergeGate>,
    event_bus: Arc<EventBus>,
    settings: WatcherSettings,
    last_head: Mutex<Option<String>>,
}

impl ChangeWatcher {
    pub fn new(
        source: Arc<dyn ChangeSource>,
        advisor: Arc<dyn Advisor>,
        sink: Arc<dyn TaskSink>,
        gate: Arc<dyn MergeGate>,
        event_bus: Arc<EventBus>,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            source,
            advisor,
            sink,
            gate,
            event_bus,
            settings,
            last_head: Mutex::new(None),
        }
    }

    pub async fn last_head(&self) -> Option<String> {
        self.last_head.lock().await.clone()
    }

    /// Check the head once. The first observation only records it.
    pub async fn poll_once(&self) -> DomainResult<Option<ChangeReport>> {
        let head = self
            .source
            .head()
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        let Some(head) = head else {
            return Ok(None);
        };

        {
            let mut last = self.last_head.lock().await;
            match last.as_deref() {
                None => {
                    tracing::info!(head = %head, "change watcher baseline recorded");
                    *last = Some(head);
                    return Ok(None);
                }
                Some(previous) if previous == head => return Ok(None),
                Some(_) => *last = Some(head.clone()),
            }
        }

        let commit = self
            .source
            .commit_info(&head)
            .await
            .map_err(|e| DomainError::ExecutionFailed(e.to_string()))?;
        self.handle_commit(commit).await.map(Some)
    }

    /// Assess a commit, enqueue its checks and, for risky changes, wait on
    /// them and block the merge if they fail.
    pub async fn handle_commit(&self, commit: CommitInfo) -> DomainResult<ChangeReport> {
        tracing::info!(
            commit = commit.short_hash(),
            author = %commit.author,
            files = commit.changes.len(),
            "change detected"
        );
        self.event_bus
            .publish(event_factory::change_event(
                EventSeverity::Info,
                None,
                EventPayload::ChangeDetected {
                    commit: commit.hash.clone(),
                    author: commit.author.clone(),
                    files: commit.changes.len(),
                },
            ))
            .await;

        let assessment = match self.advisor.assess_change(&commit).await {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(commit = commit.short_hash(), error = %e, "advisor unavailable; assuming medium severity");
                fallback_assessment(&commit)
            }
        };
        let blocking = self.should_block(&assessment, commit.branch.as_deref());

        self.event_bus
            .publish(event_factory::change_event(
                severity_level(assessment.severity),
                None,
                EventPayload::ChangeAssessed {
                    commit: commit.hash.clone(),
                    severity: assessment.severity.as_str().to_string(),
                    block_merge: blocking,
                },
            ))
            .await;

        let source = TaskSource::ChangeWatcher(commit.hash.clone());
        let test_payload = TaskPayload::Test(TestPayload {
            suite: None,
            files: commit.files(),
            tags: assessment.recommended_checks.clone(),
        });
        let task_id = self
            .sink
            .submit(
                TaskRequest::new(assessment.severity.to_priority(), test_payload)
                    .from_source(source.clone()),
            )
            .await?;

        let mut followup_task_ids = Vec::new();
        let deleted_sources = deleted_source_files(&commit);
        if !deleted_sources.is_empty() {
            let payload = TaskPayload::Analysis(AnalysisPayload {
                target: None,
                files: deleted_sources,
                reason: Some(BROKEN_IMPORTS_REASON.to_string()),
            });
            let id = self
                .sink
                .submit(TaskRequest::new(TaskPriority::High, payload).from_source(source))
                .await?;
            tracing::info!(commit = commit.short_hash(), task_id = %id, "source files deleted; analysing imports");
            followup_task_ids.push(id);
        }

        let block = if blocking {
            Some(self.await_check(&commit, &assessment, task_id).await?)
        } else {
            None
        };

        Ok(ChangeReport {
            commit: commit.hash,
            assessment,
            task_id,
            followup_task_ids,
            block,
        })
    }

    /// Whether the watcher must wait on this change's checks.
    pub fn should_block(&self, assessment: &ChangeAssessment, branch: Option<&str>) -> bool {
        if assessment.block_merge {
            return true;
        }
        if self.settings.block_on_critical_failure && assessment.severity == Severity::Critical {
            return true;
        }
        let protected = branch.is_some_and(|b| self.settings.protected_branches.iter().any(|p| p == b));
        protected && assessment.severity >= Severity::High
    }

    async fn await_check(
        &self,
        commit: &CommitInfo,
        assessment: &ChangeAssessment,
        task_id: Uuid,
    ) -> DomainResult<BlockOutcome> {
        tracing::info!(commit = commit.short_hash(), task_id = %task_id, "waiting on blocking check");
        let task = self
            .sink
            .wait_for_terminal(task_id, self.settings.block_timeout)
            .await?;

        let Some(task) = task else {
            tracing::warn!(
                commit = commit.short_hash(),
                task_id = %task_id,
                timeout_secs = self.settings.block_timeout.as_secs(),
                "blocking check timed out; merge not blocked"
            );
            return Ok(BlockOutcome::TimedOut);
        };

        let failure = match task.status {
            TaskStatus::Completed => match task.result.as_ref() {
                Some(outcome) if outcome.has_failures() => Some(outcome.summary()),
                _ => None,
            },
            _ => Some(
                task.error
                    .clone()
                    .unwrap_or_else(|| format!("check finished as {}", task.status.as_str())),
            ),
        };
        let Some(reason) = failure else {
            tracing::info!(commit = commit.short_hash(), "blocking check passed");
            return Ok(BlockOutcome::Passed);
        };

        let block = MergeBlock {
            commit: commit.hash.clone(),
            task_id,
            severity: assessment.severity,
            reason,
            blocked_at: Utc::now(),
        };
        self.gate.block(&block).await?;
        tracing::warn!(commit = commit.short_hash(), task_id = %task_id, reason = %block.reason, "merge blocked");
        self.event_bus
            .publish(event_factory::change_event(
                EventSeverity::Critical,
                Some(task_id),
                EventPayload::MergeBlocked {
                    commit: block.commit.clone(),
                    task_id,
                    reason: block.reason.clone(),
                },
            ))
            .await;
        Ok(BlockOutcome::Blocked(block))
    }

    pub fn is_critical_path(&self, path: &str) -> bool {
        self.settings
            .critical_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// React to one working-tree event. Returns the enqueued task, if any.
    pub async fn handle_file_change(&self, change: FileChange) -> DomainResult<Option<Uuid>> {
        let payload = match change.change {
            ChangeType::Modified | ChangeType::Renamed if self.is_critical_path(&change.path) => {
                tracing::warn!(path = %change.path, "critical file changed; queueing quick validation");
                TaskPayload::Test(TestPayload {
                    suite: Some(QUICK_VALIDATION_SUITE.to_string()),
                    files: vec![change.path.clone()],
                    tags: Vec::new(),
                })
            }
            ChangeType::Deleted if is_source_file(&change.path) => {
                tracing::warn!(path = %change.path, "source file deleted; queueing import check");
                TaskPayload::Analysis(AnalysisPayload {
                    target: None,
                    files: vec![change.path.clone()],
                    reason: Some(BROKEN_IMPORTS_REASON.to_string()),
                })
            }
            _ => {
                tracing::debug!(path = %change.path, change = change.change.as_str(), "file event");
                return Ok(None);
            }
        };

        let task_id = self
            .sink
            .submit(
                TaskRequest::new(TaskPriority::High, payload)
                    .from_source(TaskSource::FileWatch(change.path.clone())),
            )
            .await?;
        self.event_bus
            .publish(event_factory::change_event(
                EventSeverity::Warning,
                Some(task_id),
                EventPayload::FileChanged {
                    path: change.path,
                    change: change.change.as_str().to_string(),
                    task_id: Some(task_id),
                },
            ))
            .await;
        Ok(Some(task_id))
    }

    /// Handle file events until `cancel` fires or the stream ends. A burst
    /// of events collapses to the latest change per path once the debounce
    /// window has passed.
    pub async fn run_file_events(
        &self,
        mut events: mpsc::UnboundedReceiver<FileChange>,
        cancel: CancellationToken,
    ) {
        tracing::info!(
            debounce_ms = u64::try_from(self.settings.debounce.as_millis()).unwrap_or(u64::MAX),
            "file event handling started"
        );

        loop {
            let first = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(change) => change,
                    None => break,
                },
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.settings.debounce) => {}
            }

            let mut pending = BTreeMap::new();
            pending.insert(first.path.clone(), first);
            while let Ok(change) = events.try_recv() {
                pending.insert(change.path.clone(), change);
            }
            for change in pending.into_values() {
                if let Err(e) = self.handle_file_change(change).await {
                    tracing::warn!(error = %e, "file event handling failed");
                }
            }
        }
        tracing::debug!("file event handling stopped");
    }

    /// Poll until `cancel` fires. Poll errors are logged and retried.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(poll_interval_secs = self.settings.poll_interval.as_secs(), "change watcher started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "change poll failed");
            }
        }
        tracing::debug!("change watcher stopped");
    }
}

fn severity_level(severity: Severity) -> EventSeverity {
    match severity {
        Severity::Low | Severity::Medium => EventSeverity::Info,
        Severity::High => EventSeverity::Warning,
        Severity::Critical => EventSeverity::Error,
    }
}

fn fallback_assessment(commit: &CommitInfo) -> ChangeAssessment {
    ChangeAssessment {
        severity: Severity::Medium,
        affected_components: Vec::new(),
        risk_factors: vec!["advisor unavailable".to_string()],
        recommended_checks: Vec::new(),
        block_merge: false,
        estimated_test_secs: u64::try_from(commit.changes.len()).unwrap_or(u64::MAX) * 30,
    }
}

fn is_source_file(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn deleted_source_files(commit: &CommitInfo) -> Vec<String> {
    commit
        .changes
        .iter()
        .filter(|c| c.change == ChangeType::Deleted && is_source_file(&c.path))
        .map(|c| c.path.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::FileChange;

    fn settings() -> WatcherSettings {
        WatcherSettings {
            poll_interval: Duration::from_secs(1),
            block_timeout: Duration::from_secs(5),
            protected_branches: vec!["main".to_string()],
            block_on_critical_failure: true,
            critical_paths: vec!["src/core/".to_string()],
            debounce: Duration::from_millis(20),
        }
    }

    fn assessment(severity: Severity, block_merge: bool) -> ChangeAssessment {
        ChangeAssessment {
            severity,
            affected_components: vec![],
            risk_factors: vec![],
            recommended_checks: vec![],
            block_merge,
            estimated_test_secs: 0,
        }
    }

    #[test]
    fn test_deleted_source_files() {
        let commit = CommitInfo {
            hash: "abc".into(),
            author: "dev".into(),
            date: String::new(),
            message: String::new(),
            branch: None,
            changes: vec![
                FileChange::new("src/old.rs", ChangeType::Deleted),
                FileChange::new("docs/old.md", ChangeType::Deleted),
                FileChange::new("web/app.ts", ChangeType::Modified),
                FileChange::new("lib/util.py", ChangeType::Deleted),
            ],
        };
        assert_eq!(deleted_source_files(&commit), vec!["src/old.rs", "lib/util.py"]);
    }

    #[test]
    fn test_block_rules() {
        let gate: Arc<dyn MergeGate> = Arc::new(crate::adapters::merge_gate::InMemoryMergeGate::new());
        let watcher = ChangeWatcher::new(
            Arc::new(NoSource),
            Arc::new(crate::adapters::advisors::HeuristicAdvisor::default()),
            Arc::new(NoSink),
            gate,
            Arc::new(EventBus::default()),
            settings(),
        );

        assert!(watcher.should_block(&assessment(Severity::Low, true), None));
        assert!(watcher.should_block(&assessment(Severity::Critical, false), None));
        assert!(watcher.should_block(&assessment(Severity::High, false), Some("main")));
        assert!(!watcher.should_block(&assessment(Severity::High, false), Some("feature/x")));
        assert!(!watcher.should_block(&assessment(Severity::Medium, false), Some("main")));
    }

    /// Accepts every request and remembers it.
    #[derive(Default)]
    struct RecordingSink {
        requests: std::sync::Mutex<Vec<TaskRequest>>,
    }

    impl RecordingSink {
        fn requests(&self) -> Vec<TaskRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl TaskSink for RecordingSink {
        async fn submit(&self, request: TaskRequest) -> DomainResult<Uuid> {
            self.requests.lock().unwrap().push(request);
            Ok(Uuid::new_v4())
        }

        async fn task(&self, _task_id: Uuid) -> Option<crate::domain::models::Task> {
            None
        }

        async fn wait_for_terminal(
            &self,
            _task_id: Uuid,
            _timeout: Duration,
        ) -> DomainResult<Option<crate::domain::models::Task>> {
            Ok(None)
        }
    }

    fn file_watcher(sink: Arc<RecordingSink>) -> ChangeWatcher {
        ChangeWatcher::new(
            Arc::new(NoSource),
            Arc::new(crate::adapters::advisors::HeuristicAdvisor::default()),
            sink,
            Arc::new(crate::adapters::merge_gate::InMemoryMergeGate::new()),
            Arc::new(EventBus::default()),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_critical_file_change_queues_quick_validation() {
        let sink = Arc::new(RecordingSink::default());
        let watcher = file_watcher(Arc::clone(&sink));

        let id = watcher
            .handle_file_change(FileChange::new("src/core/engine.rs", ChangeType::Modified))
            .await
            .unwrap();
        assert!(id.is_some());

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].priority, TaskPriority::High);
        assert_eq!(requests[0].source, TaskSource::FileWatch("src/core/engine.rs".to_string()));
        match &requests[0].payload {
            TaskPayload::Test(test) => {
                assert_eq!(test.suite.as_deref(), Some(QUICK_VALIDATION_SUITE));
                assert_eq!(test.files, vec!["src/core/engine.rs"]);
            }
            other => panic!("expected a test payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deleted_source_file_queues_import_check() {
        let sink = Arc::new(RecordingSink::default());
        let watcher = file_watcher(Arc::clone(&sink));

        let id = watcher
            .handle_file_change(FileChange::new("web/lib/api.ts", ChangeType::Deleted))
            .await
            .unwrap();
        assert!(id.is_some());

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].priority, TaskPriority::High);
        match &requests[0].payload {
            TaskPayload::Analysis(analysis) => {
                assert_eq!(analysis.reason.as_deref(), Some(BROKEN_IMPORTS_REASON));
                assert_eq!(analysis.files, vec!["web/lib/api.ts"]);
            }
            other => panic!("expected an analysis payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ordinary_file_events_queue_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let watcher = file_watcher(Arc::clone(&sink));

        for change in [
            FileChange::new("src/ui/button.rs", ChangeType::Modified),
            FileChange::new("src/core/new.rs", ChangeType::Added),
            FileChange::new("docs/old.md", ChangeType::Deleted),
        ] {
            assert!(watcher.handle_file_change(change).await.unwrap().is_none());
        }
        assert!(sink.requests().is_empty());
    }

    #[tokio::test]
    async fn test_file_event_burst_keeps_latest_change_per_path() {
        let sink = Arc::new(RecordingSink::default());
        let watcher = file_watcher(Arc::clone(&sink));
        let (tx, rx) = mpsc::unbounded_channel();

        tx.send(FileChange::new("src/core/a.rs", ChangeType::Modified)).unwrap();
        tx.send(FileChange::new("src/core/a.rs", ChangeType::Modified)).unwrap();
        tx.send(FileChange::new("src/core/a.rs", ChangeType::Deleted)).unwrap();
        tx.send(FileChange::new("src/core/b.rs", ChangeType::Modified)).unwrap();
        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), watcher.run_file_events(rx, CancellationToken::new()))
            .await
            .unwrap();

        let requests = sink.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].kind, crate::domain::models::TaskKind::Analysis);
        assert_eq!(requests[1].kind, crate::domain::models::TaskKind::Test);
    }

    struct NoSource;

    #[async_trait::async_trait]
    impl ChangeSource for NoSource {
        async fn head(&self) -> Result<Option<String>, crate::domain::errors::ChangeSourceError> {
            Ok(None)
        }

        async fn commit_info(&self, revision: &str) -> Result<CommitInfo, crate::domain::errors::ChangeSourceError> {
            Err(crate::domain::errors::ChangeSourceError::CommandFailed(revision.to_string()))
        }
    }

    struct NoSink;

    #[async_trait::async_trait]
    impl TaskSink for NoSink {
        async fn submit(&self, _request: TaskRequest) -> DomainResult<Uuid> {
            Err(DomainError::ShuttingDown)
        }

        async fn task(&self, _task_id: Uuid) -> Option<crate::domain::models::Task> {
            None
        }

        async fn wait_for_terminal(
            &self,
            _task_id: Uuid,
            _timeout: Duration,
        ) -> DomainResult<Option<crate::domain::models::Task>> {
            Ok(None)
        }
    }
}
