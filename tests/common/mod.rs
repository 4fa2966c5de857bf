//! Common test utilities for integration tests
//!
//! Shared fixtures: fast configurations, a running dispatcher, and a
//! scripted change source.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use conductor::adapters::MockExecutor;
use conductor::domain::errors::{ChangeSourceError, DomainResult};
use conductor::domain::models::{ChangeType, CommitInfo, Config, FileChange, PoolConfig};
use conductor::domain::ports::ChangeSource;
use conductor::services::{Dispatcher, DispatcherConfig, EventBus, PoolBounds};

/// Setup test logging
#[allow(dead_code)]
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Configuration with millisecond ticks and no cron or watcher activity.
pub fn fast_config(state_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.state_dir = state_dir.to_path_buf();
    config.pool.tick_interval_ms = 10;
    config.pool.drain_timeout_secs = 2;
    config.scheduler.enabled = false;
    config.scheduler.schedules.clear();
    config.workflow.backoff_unit_ms = 1;
    config.watcher.enabled = false;
    config
}

pub fn pool_config(min_workers: usize, max_workers: usize) -> PoolConfig {
    PoolConfig {
        min_workers,
        max_workers,
        tick_interval_ms: 10,
        drain_timeout_secs: 2,
        ..PoolConfig::default()
    }
}

/// A dispatcher with its run loop already spawned.
pub struct RunningDispatcher {
    pub dispatcher: Dispatcher,
    pub event_bus: Arc<EventBus>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<DomainResult<()>>,
}

impl RunningDispatcher {
    pub fn start(executor: MockExecutor, min_workers: usize, max_workers: usize) -> Self {
        let config = pool_config(min_workers, max_workers);
        let event_bus = Arc::new(EventBus::default());
        let dispatcher = Dispatcher::new(
            DispatcherConfig::from(&config),
            PoolBounds::from(&config),
            Arc::new(executor),
            Arc::clone(&event_bus),
        );
        let cancel = CancellationToken::new();
        let handle = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(cancel).await })
        };
        Self {
            dispatcher,
            event_bus,
            cancel,
            handle,
        }
    }

    pub async fn stop(self) {
        self.dispatcher.shutdown().await;
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// Poll `check` every 10ms until it returns true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

pub fn commit(hash: &str, branch: Option<&str>, changes: Vec<FileChange>) -> CommitInfo {
    CommitInfo {
        hash: hash.to_string(),
        author: "dev".to_string(),
        date: "2024-01-01".to_string(),
        message: format!("commit {hash}"),
        branch: branch.map(ToString::to_string),
        changes,
    }
}

/// Files deleted under a critical path, enough to score as critical.
pub fn critical_changes() -> Vec<FileChange> {
    (0..4)
        .map(|i| FileChange::new(format!("src/auth/session{i}.rs"), ChangeType::Deleted))
        .collect()
}

/// Change source that reports a fixed sequence of heads.
#[derive(Default)]
pub struct ScriptedSource {
    heads: Mutex<VecDeque<Option<String>>>,
    current: Mutex<Option<String>>,
    commits: Mutex<Vec<CommitInfo>>,
}

impl ScriptedSource {
    pub fn new(heads: impl IntoIterator<Item = Option<&'static str>>, commits: Vec<CommitInfo>) -> Self {
        Self {
            heads: Mutex::new(heads.into_iter().map(|h| h.map(ToString::to_string)).collect()),
            current: Mutex::new(None),
            commits: Mutex::new(commits),
        }
    }
}

#[async_trait]
impl ChangeSource for ScriptedSource {
    async fn head(&self) -> Result<Option<String>, ChangeSourceError> {
        let mut current = self.current.lock().await;
        if let Some(next) = self.heads.lock().await.pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }

    async fn commit_info(&self, revision: &str) -> Result<CommitInfo, ChangeSourceError> {
        self.commits
            .lock()
            .await
            .iter()
            .find(|c| c.hash == revision)
            .cloned()
            .ok_or_else(|| ChangeSourceError::Parse(format!("unknown revision {revision}")))
    }
}
