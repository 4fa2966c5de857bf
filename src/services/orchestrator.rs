//! Orchestrator facade.
//!
//! Wires the dispatcher, workflow engine, scheduler and change watcher from
//! a [`Config`] and owns their background tasks.
//!
//! Shutdown order: producers (scheduler, watcher) stop first, then the
//! dispatcher drains, then the dispatch loop and the workflow trigger
//! listener are cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent_pool::PoolBounds;
use super::change_watcher::{ChangeWatcher, WatcherSettings};
use super::dispatcher::{Dispatcher, DispatcherConfig, ShutdownReport, TaskLifecycle};
use super::event_bus::{EventBus, EventPayload, EventSeverity};
use super::event_factory;
use super::scheduler::{Scheduler, SchedulerSettings};
use super::step_registry::StepRegistry;
use super::workflow_engine::{WorkflowEngine, WorkflowEngineConfig};
use super::workflow_policy::WorkflowPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Config, MergeBlock, OrchestratorMetrics, Task, TaskKind, TaskPayload, TaskPriority,
    WorkerSnapshot,
};
use crate::domain::ports::{
    Advisor, ChangeSource, FileEventSource, MergeGate, TaskExecutor, TaskSink,
};

/// Point-in-time view of the whole orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub accepting: bool,
    pub metrics: OrchestratorMetrics,
    pub workers: Vec<WorkerSnapshot>,
    pub queued: Vec<Task>,
    pub in_flight: Vec<Task>,
    pub scheduler_running: bool,
    pub watcher_enabled: bool,
    pub merge_block: Option<MergeBlock>,
}

pub struct Orchestrator {
    config: Config,
    event_bus: Arc<EventBus>,
    dispatcher: Dispatcher,
    engine: Arc<WorkflowEngine>,
    scheduler: Scheduler,
    advisor: Arc<dyn Advisor>,
    watcher: Option<Arc<ChangeWatcher>>,
    gate: Option<Arc<dyn MergeGate>>,
    file_events: Option<Arc<dyn FileEventSource>>,
    lifecycle_rx: Mutex<Option<mpsc::UnboundedReceiver<TaskLifecycle>>>,
    producer_cancel: CancellationToken,
    core_cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    dispatch_handle: Mutex<Option<JoinHandle<DomainResult<()>>>>,
    started: AtomicBool,
}

impl Orchestrator {
    /// Build every component from `config`, registering the built-in
    /// workflows and the configured schedules.
    pub async fn new(
        config: Config,
        executor: Arc<dyn TaskExecutor>,
        advisor: Arc<dyn Advisor>,
        event_bus: Arc<EventBus>,
    ) -> DomainResult<Self> {
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            DispatcherConfig::from(&config.pool),
            PoolBounds::from(&config.pool),
            executor,
            Arc::clone(&event_bus),
        )
        .with_lifecycle_channel(lifecycle_tx);
        let sink: Arc<dyn TaskSink> = Arc::new(dispatcher.clone());

        let registry = StepRegistry::with_builtins(
            Arc::clone(&sink),
            Duration::from_secs(config.workflow.step_task_timeout_secs),
        );
        let engine = WorkflowEngine::new(
            Arc::new(registry),
            WorkflowPolicy::from_config(config.workflow.rules.as_deref()),
            Arc::clone(&sink),
            Arc::clone(&event_bus),
            WorkflowEngineConfig::from(&config.workflow),
        );
        engine.register_builtins().await?;

        let scheduler = Scheduler::new(
            Arc::clone(&sink),
            Arc::clone(&advisor),
            Arc::clone(&event_bus),
            SchedulerSettings::from(&config.scheduler),
        );
        for entry in &config.scheduler.schedules {
            scheduler.add_schedule(entry.clone()).await?;
        }

        Ok(Self {
            config,
            event_bus,
            dispatcher,
            engine: Arc::new(engine),
            scheduler,
            advisor,
            watcher: None,
            gate: None,
            file_events: None,
            lifecycle_rx: Mutex::new(Some(lifecycle_rx)),
            producer_cancel: CancellationToken::new(),
            core_cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            dispatch_handle: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Attach a change watcher polling `source` and recording blocks in `gate`.
    pub fn with_change_source(mut self, source: Arc<dyn ChangeSource>, gate: Arc<dyn MergeGate>) -> Self {
        let watcher = ChangeWatcher::new(
            source,
            Arc::clone(&self.advisor),
            Arc::new(self.dispatcher.clone()),
            Arc::clone(&gate),
            Arc::clone(&self.event_bus),
            WatcherSettings::from_config(&self.config.watcher, &self.config.workflow),
        );
        self.watcher = Some(Arc::new(watcher));
        self.gate = Some(gate);
        self
    }

    /// Feed working-tree file events to the change watcher. Has no effect
    /// unless a change source is attached too.
    pub fn with_file_events(mut self, events: Arc<dyn FileEventSource>) -> Self {
        self.file_events = Some(events);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn watcher(&self) -> Option<&Arc<ChangeWatcher>> {
        self.watcher.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the dispatch loop, the workflow trigger listener and, when
    /// enabled, the scheduler and change watcher.
    pub async fn start(&self) -> DomainResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DomainError::ValidationFailed("orchestrator already started".to_string()));
        }
        let Some(lifecycle_rx) = self.lifecycle_rx.lock().await.take() else {
            return Err(DomainError::ValidationFailed(
                "orchestrator cannot be restarted after stop".to_string(),
            ));
        };

        let dispatcher = self.dispatcher.clone();
        let cancel = self.core_cancel.clone();
        *self.dispatch_handle.lock().await = Some(tokio::spawn(async move { dispatcher.run(cancel).await }));

        let mut handles = self.handles.lock().await;
        handles.push(Arc::clone(&self.engine).spawn_trigger_listener(lifecycle_rx, self.core_cancel.clone()));

        if self.config.scheduler.enabled {
            handles.push(self.scheduler.start(self.producer_cancel.clone())?);
        }

        match &self.watcher {
            Some(watcher) if self.config.watcher.enabled => {
                let poller = Arc::clone(watcher);
                let cancel = self.producer_cancel.clone();
                handles.push(tokio::spawn(async move { poller.run(cancel).await }));

                if let Some(events) = self.file_events.as_ref().and_then(|source| source.subscribe()) {
                    let watcher = Arc::clone(watcher);
                    let cancel = self.producer_cancel.clone();
                    handles.push(tokio::spawn(async move { watcher.run_file_events(events, cancel).await }));
                }
            }
            Some(_) => tracing::debug!("change watcher configured but disabled"),
            None => {}
        }

        tracing::info!(
            min_workers = self.config.pool.min_workers,
            max_workers = self.config.pool.max_workers,
            scheduler = self.config.scheduler.enabled,
            watcher = self.watcher.is_some() && self.config.watcher.enabled,
            "orchestrator started"
        );
        self.event_bus
            .publish(event_factory::orchestrator_event(
                EventSeverity::Info,
                EventPayload::OrchestratorStarted {
                    min_workers: self.config.pool.min_workers,
                    max_workers: self.config.pool.max_workers,
                },
            ))
            .await;
        Ok(())
    }

    /// Stop producers, drain the dispatcher and stop the background tasks.
    pub async fn stop(&self) -> ShutdownReport {
        self.scheduler.stop();
        self.producer_cancel.cancel();

        let report = self.dispatcher.shutdown().await;

        self.core_cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "background task panicked");
                }
            }
        }
        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "dispatch loop ended with an error"),
                Err(e) => tracing::error!(error = %e, "dispatch loop task failed"),
            }
        }
        self.started.store(false, Ordering::SeqCst);

        tracing::info!(
            cancelled_queued = report.cancelled_queued,
            drained = report.drained,
            forced = report.forced.len(),
            "orchestrator stopped"
        );
        self.event_bus
            .publish(event_factory::orchestrator_event(
                EventSeverity::Info,
                EventPayload::OrchestratorStopped {
                    drained: report.drained,
                    forced: report.forced.len(),
                },
            ))
            .await;
        report
    }

    /// Wait for the dispatch loop to end. Errors from the loop are fatal.
    pub async fn join_dispatch_loop(&self) -> DomainResult<()> {
        let Some(handle) = self.dispatch_handle.lock().await.take() else {
            return Ok(());
        };
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(DomainError::PoolInvariant(format!("dispatch loop aborted: {e}"))),
        }
    }

    pub async fn submit(&self, kind: TaskKind, priority: TaskPriority, payload: TaskPayload) -> DomainResult<Uuid> {
        self.dispatcher.enqueue(kind, priority, payload).await
    }

    pub async fn merge_block(&self) -> DomainResult<Option<MergeBlock>> {
        match &self.gate {
            Some(gate) => gate.current().await,
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> DomainResult<OrchestratorStatus> {
        Ok(OrchestratorStatus {
            running: self.is_started(),
            accepting: self.dispatcher.is_accepting().await,
            metrics: self.dispatcher.metrics().await,
            workers: self.dispatcher.workers().await,
            queued: self.dispatcher.queued_tasks().await,
            in_flight: self.dispatcher.running_tasks().await,
            scheduler_running: self.scheduler.is_running(),
            watcher_enabled: self.watcher.is_some() && self.config.watcher.enabled,
            merge_block: self.merge_block().await?,
        })
    }
}
