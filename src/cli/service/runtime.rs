//! Building a configured orchestrator for a CLI invocation.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::{
    CommandExecutor, FileMergeGate, GitChangeSource, HeuristicAdvisor, InMemoryMergeGate,
    NotifyFileWatcher,
};
use crate::domain::models::Config;
use crate::domain::ports::MergeGate;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{EventBus, EventBusConfig, JsonlEventStore, Orchestrator};

/// Which background producers a CLI invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub scheduler: bool,
    pub watcher: bool,
    pub auto_trigger: bool,
}

impl RuntimeOptions {
    /// Everything the configuration enables. Used by `start`.
    pub const fn daemon() -> Self {
        Self {
            scheduler: true,
            watcher: true,
            auto_trigger: true,
        }
    }

    /// A one-shot run: no cron fires, no repository polling, and no
    /// follow-up workflows outliving the command.
    pub const fn in_process() -> Self {
        Self {
            scheduler: false,
            watcher: false,
            auto_trigger: false,
        }
    }
}

/// Load configuration from `path`, or from `.conductor/` in the working directory.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Wire an orchestrator with the command executor, the heuristic advisor and
/// the JSONL audit log under the state directory.
pub async fn build_orchestrator(mut config: Config, options: RuntimeOptions) -> Result<Orchestrator> {
    config.scheduler.enabled &= options.scheduler;
    config.workflow.auto_trigger &= options.auto_trigger;

    let store = JsonlEventStore::new(config.events_path());
    let event_bus = Arc::new(EventBus::new(EventBusConfig::default()).with_store(Arc::new(store)));
    let executor = Arc::new(CommandExecutor::new(config.executor.clone()));
    let advisor = Arc::new(HeuristicAdvisor::new(config.watcher.critical_paths.clone()));

    let watch = options.watcher && config.watcher.enabled;
    let watcher_config = config.watcher.clone();

    let orchestrator = Orchestrator::new(config, executor, advisor, event_bus)
        .await
        .context("Failed to build orchestrator")?;

    if !watch {
        return Ok(orchestrator);
    }
    let repo_path = watcher_config.repo_path;
    let gate: Arc<dyn MergeGate> = match watcher_config.merge_block_file {
        Some(path) => Arc::new(FileMergeGate::new(path)),
        None => Arc::new(InMemoryMergeGate::new()),
    };
    tracing::info!(repo = %repo_path.display(), "change watcher attached");
    let mut orchestrator =
        orchestrator.with_change_source(Arc::new(GitChangeSource::new(repo_path.clone())), gate);

    if watcher_config.watch_files {
        match NotifyFileWatcher::start(&repo_path, &watcher_config.watch_paths, watcher_config.ignore_patterns) {
            Ok(files) => orchestrator = orchestrator.with_file_events(Arc::new(files)),
            Err(e) => tracing::warn!(error = %e, "file events unavailable; watching commits only"),
        }
    }
    Ok(orchestrator)
}

/// Build and start an orchestrator for a one-shot command. Callers must
/// `stop()` it before exiting so in-flight work drains.
pub async fn start_in_process(config: Config) -> Result<Orchestrator> {
    let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await?;
    orchestrator.start().await.context("Failed to start orchestrator")?;
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_process_disables_producers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state_dir = dir.path().to_path_buf();
        config.watcher.enabled = true;

        let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await.unwrap();
        assert!(!orchestrator.config().scheduler.enabled);
        assert!(!orchestrator.config().workflow.auto_trigger);
        assert!(orchestrator.watcher().is_none());
    }

    #[tokio::test]
    async fn test_daemon_attaches_watcher_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state_dir = dir.path().to_path_buf();
        config.watcher.enabled = true;
        config.watcher.repo_path = dir.path().to_path_buf();
        config.watcher.merge_block_file = None;

        let orchestrator = build_orchestrator(config, RuntimeOptions::daemon()).await.unwrap();
        assert!(orchestrator.watcher().is_some());
        assert!(orchestrator.merge_block().await.unwrap().is_none());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/conductor.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
