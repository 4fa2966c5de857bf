//! Dispatcher: the orchestrator's control loop.
//!
//! Owns the priority queue and the agent pool behind one mutex. Producers
//! (scheduler, change watcher, workflow steps, the CLI) only ever call
//! [`Dispatcher::submit_request`] and the status queries; the dispatch loop
//! is the single consumer that binds queued tasks to idle workers.
//!
//! Executor calls run on their own tokio tasks, so a slow executor never
//! blocks the loop. Executor errors, timeouts and panics are recorded on the
//! task; failures of the loop itself are returned from [`Dispatcher::run`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::agent_pool::{AgentPool, PoolBounds};
use super::event_bus::{EventBus, EventPayload, EventSeverity, UnifiedEvent};
use super::event_factory;
use crate::domain::errors::{DomainError, DomainResult, ExecutorError};
use crate::domain::models::{
    LifecycleEvent, MetricsTracker, OrchestratorMetrics, PoolConfig, Task, TaskKind, TaskOutcome,
    TaskPayload, TaskPriority, TaskQueue, TaskSource, TaskStatus, WorkerId, WorkerSnapshot,
};
use crate::domain::ports::{execute_payload, ExecutionContext, TaskExecutor, TaskRequest, TaskSink};

/// Dispatcher timing and retention settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    /// Depth above which enqueues log a backpressure warning.
    pub max_queue_size: usize,
    pub task_timeout: Option<Duration>,
    pub drain_timeout: Duration,
    /// Terminal tasks kept for status queries.
    pub history_limit: usize,
    pub metrics_window: usize,
}

impl From<&PoolConfig> for DispatcherConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            max_queue_size: config.max_queue_size,
            task_timeout: config.task_timeout(),
            drain_timeout: config.drain_timeout(),
            history_limit: config.history_limit,
            metrics_window: config.metrics_window,
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Terminal notification forwarded to the workflow trigger.
#[derive(Debug, Clone)]
pub struct TaskLifecycle {
    pub event: LifecycleEvent,
    pub task: Task,
}

/// What one dispatch tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: Vec<(Uuid, WorkerId)>,
    pub spawned: Option<WorkerId>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.started.is_empty() && self.spawned.is_none()
    }
}

/// Outcome of [`Dispatcher::shutdown`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub cancelled_queued: usize,
    pub drained: usize,
    pub forced: Vec<Uuid>,
}

struct RunningTask {
    task: Task,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct DispatchState {
    queue: TaskQueue<Task>,
    pool: AgentPool,
    running: HashMap<Uuid, RunningTask>,
    history: VecDeque<Task>,
    metrics: MetricsTracker,
    accepting: bool,
    /// Set when a completion path hits a pool invariant violation.
    fatal: Option<String>,
}

impl DispatchState {
    fn find(&self, task_id: Uuid) -> Option<Task> {
        if let Some(running) = self.running.get(&task_id) {
            return Some(running.task.clone());
        }
        self.queue
            .iter()
            .find(|t| t.id == task_id)
            .or_else(|| self.history.iter().rev().find(|t| t.id == task_id))
            .cloned()
    }

    fn archive(&mut self, task: Task, limit: usize) {
        self.metrics.record(&task);
        self.history.push_back(task);
        while self.history.len() > limit.max(1) {
            self.history.pop_front();
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<Mutex<DispatchState>>,
    executor: Arc<dyn TaskExecutor>,
    event_bus: Arc<EventBus>,
    config: DispatcherConfig,
    lifecycle_tx: Option<mpsc::UnboundedSender<TaskLifecycle>>,
    terminal_tx: Arc<watch::Sender<u64>>,
    wakeup: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        bounds: PoolBounds,
        executor: Arc<dyn TaskExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (terminal_tx, _) = watch::channel(0u64);
        let state = DispatchState {
            queue: TaskQueue::with_capacity(config.max_queue_size),
            pool: AgentPool::new(bounds),
            running: HashMap::new(),
            history: VecDeque::new(),
            metrics: MetricsTracker::new(config.metrics_window),
            accepting: true,
            fatal: None,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            executor,
            event_bus,
            config,
            lifecycle_tx: None,
            terminal_tx: Arc::new(terminal_tx),
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Forward completed/failed tasks to `tx` (the workflow trigger).
    pub fn with_lifecycle_channel(mut self, tx: mpsc::UnboundedSender<TaskLifecycle>) -> Self {
        self.lifecycle_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Enqueue a direct task.
    pub async fn enqueue(
        &self,
        kind: TaskKind,
        priority: TaskPriority,
        payload: TaskPayload,
    ) -> DomainResult<Uuid> {
        self.submit_request(TaskRequest {
            kind,
            priority,
            payload,
            source: TaskSource::Direct,
        })
        .await
    }

    /// Enqueue a task. Rejects only malformed requests and enqueues after shutdown.
    pub async fn submit_request(&self, request: TaskRequest) -> DomainResult<Uuid> {
        let task = Task::new(request.kind, request.priority, request.payload)?.with_source(request.source);
        let task_id = task.id;
        let mut events = vec![event_factory::task_event(
            EventSeverity::Info,
            task_id,
            EventPayload::TaskEnqueued {
                task_id,
                kind: task.kind.as_str().to_string(),
                priority: task.priority.as_str().to_string(),
                source: task.source.as_str().to_string(),
            },
        )];

        {
            let mut state = self.state.lock().await;
            if !state.accepting {
                return Err(DomainError::ShuttingDown);
            }
            let depth = state.queue.len();
            if depth >= self.config.max_queue_size {
                tracing::warn!(
                    queued = depth,
                    max_queue_size = self.config.max_queue_size,
                    "task queue above configured size"
                );
                events.push(event_factory::orchestrator_event(
                    EventSeverity::Warning,
                    EventPayload::QueueBackpressure {
                        queued: depth + 1,
                        max_queue_size: self.config.max_queue_size,
                    },
                ));
            }
            tracing::debug!(
                task_id = %task_id,
                kind = task.kind.as_str(),
                priority = task.priority.as_str(),
                source = task.source.as_str(),
                "task enqueued"
            );
            let rank = task.priority.rank();
            state.queue.enqueue(task, rank);
        }

        self.event_bus.publish_all(events).await;
        self.wakeup.notify_one();
        Ok(task_id)
    }

    /// One dispatch step: bind queued tasks to idle workers, highest priority
    /// first, scaling the pool up by at most one worker when starved.
    ///
    /// On an empty queue this touches no state and publishes nothing.
    pub async fn tick(&self) -> DomainResult<TickReport> {
        let mut report = TickReport::default();
        let mut events = Vec::new();

        {
            let mut state = self.state.lock().await;
            if let Some(reason) = state.fatal.take() {
                return Err(DomainError::PoolInvariant(reason));
            }
            if !state.accepting {
                return Ok(report);
            }

            while let Some(task_id) = state.queue.peek().map(|t| t.id) {
                let worker = match state.pool.available_workers().first().copied() {
                    Some(worker) => worker,
                    None if report.spawned.is_none() => match state.pool.scale_up() {
                        Some(worker) => {
                            tracing::info!(worker = %worker, pool_size = state.pool.size(), "scaled pool up");
                            report.spawned = Some(worker);
                            events.push(event_factory::worker_event(EventPayload::WorkerSpawned {
                                worker: worker.to_string(),
                                pool_size: state.pool.size(),
                            }));
                            worker
                        }
                        None => break,
                    },
                    None => break,
                };

                state.pool.bind(worker, task_id)?;
                let Some(mut task) = state.queue.dequeue() else {
                    return Err(DomainError::PoolInvariant(format!(
                        "queued task {task_id} vanished during dispatch"
                    )));
                };
                task.assign(worker)?;
                task.transition_to(TaskStatus::Running)?;

                tracing::info!(
                    task_id = %task_id,
                    worker = %worker,
                    kind = task.kind.as_str(),
                    priority = task.priority.as_str(),
                    "task started"
                );
                events.push(event_factory::task_event(
                    EventSeverity::Info,
                    task_id,
                    EventPayload::TaskStarted {
                        task_id,
                        worker: worker.to_string(),
                    },
                ));

                let cancel = CancellationToken::new();
                let handle = self.spawn_execution(&task, worker, cancel.clone());
                state.running.insert(task_id, RunningTask { task, cancel, handle });
                report.started.push((task_id, worker));
            }
        }

        self.event_bus.publish_all(events).await;
        Ok(report)
    }

    fn spawn_execution(&self, task: &Task, worker: WorkerId, cancel: CancellationToken) -> JoinHandle<()> {
        let this = self.clone();
        let task_id = task.id;
        let payload = task.payload.clone();
        let ctx = ExecutionContext::new(task_id, worker, task.priority).with_cancel(cancel);

        tokio::spawn(async move {
            let result = this.run_executor(payload, ctx).await;
            if let Err(e) = this.finalize(task_id, worker, result).await {
                tracing::error!(task_id = %task_id, worker = %worker, error = %e, "failed to record task result");
                this.state.lock().await.fatal.get_or_insert(e.to_string());
                this.wakeup.notify_one();
            }
        })
    }

    /// Run the executor on its own task so panics and timeouts stay isolated.
    async fn run_executor(
        &self,
        payload: TaskPayload,
        ctx: ExecutionContext,
    ) -> Result<TaskOutcome, ExecutorError> {
        let executor = Arc::clone(&self.executor);
        let cancel = ctx.cancel.clone();
        let mut handle =
            tokio::spawn(async move { execute_payload(executor.as_ref(), &payload, &ctx).await });

        let joined = match self.config.task_timeout {
            Some(limit) => {
                if let Ok(joined) = tokio::time::timeout(limit, &mut handle).await {
                    joined
                } else {
                    cancel.cancel();
                    handle.abort();
                    return Err(ExecutorError::TimedOut(limit));
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                let panic = e.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ExecutorError::Panicked(message))
            }
            Err(_) => Err(ExecutorError::Cancelled),
        }
    }

    async fn finalize(
        &self,
        task_id: Uuid,
        worker: WorkerId,
        result: Result<TaskOutcome, ExecutorError>,
    ) -> DomainResult<()> {
        let task = {
            let mut state = self.state.lock().await;
            let Some(running) = state.running.remove(&task_id) else {
                // Already settled by shutdown.
                return Ok(());
            };
            let mut task = running.task;
            match result {
                Ok(outcome) => task.complete(outcome)?,
                Err(ExecutorError::Cancelled) => task.cancel("cancelled")?,
                Err(e) => task.fail(e.to_string())?,
            }
            state.archive(task.clone(), self.config.history_limit);
            state.pool.release(worker, task_id)?;
            task
        };

        let event = Self::terminal_event(&task);
        match task.status {
            TaskStatus::Completed => {
                tracing::info!(task_id = %task_id, worker = %worker, duration_ms = task.duration_ms(), "task completed");
            }
            TaskStatus::Failed => {
                tracing::warn!(task_id = %task_id, worker = %worker, error = task.error.as_deref().unwrap_or(""), "task failed");
            }
            _ => tracing::info!(task_id = %task_id, worker = %worker, "task cancelled"),
        }
        self.event_bus.publish(event).await;

        let lifecycle = match task.status {
            TaskStatus::Completed => Some(LifecycleEvent::Completed),
            TaskStatus::Failed => Some(LifecycleEvent::Failed),
            _ => None,
        };
        if let (Some(event), Some(tx)) = (lifecycle, self.lifecycle_tx.as_ref()) {
            if tx.send(TaskLifecycle { event, task }).is_err() {
                tracing::debug!(task_id = %task_id, "workflow trigger is gone; lifecycle not forwarded");
            }
        }

        self.notify_terminal();
        self.wakeup.notify_one();
        Ok(())
    }

    fn terminal_event(task: &Task) -> UnifiedEvent {
        let worker = task.worker.map(|w| w.to_string());
        match task.status {
            TaskStatus::Completed => event_factory::task_event(
                EventSeverity::Info,
                task.id,
                EventPayload::TaskCompleted {
                    task_id: task.id,
                    worker: worker.unwrap_or_default(),
                    duration_ms: task.duration_ms(),
                    summary: task.result.as_ref().map(TaskOutcome::summary).unwrap_or_default(),
                },
            ),
            TaskStatus::Failed => event_factory::task_event(
                EventSeverity::Error,
                task.id,
                EventPayload::TaskFailed {
                    task_id: task.id,
                    worker,
                    error: task.error.clone().unwrap_or_default(),
                },
            ),
            _ => event_factory::task_event(
                EventSeverity::Warning,
                task.id,
                EventPayload::TaskCancelled {
                    task_id: task.id,
                    reason: task.error.clone().unwrap_or_default(),
                },
            ),
        }
    }

    fn notify_terminal(&self) {
        self.terminal_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Look up a task in the queue, the running set or the history.
    pub async fn status(&self, task_id: Uuid) -> Option<Task> {
        self.state.lock().await.find(task_id)
    }

    /// Cancel a task. Queued tasks are cancelled immediately; running tasks
    /// get their cancellation signal and settle when the executor returns.
    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<TaskStatus> {
        let mut state = self.state.lock().await;

        if let Some(mut task) = state.queue.remove_first(|t| t.id == task_id) {
            task.cancel("cancelled before dispatch")?;
            let event = Self::terminal_event(&task);
            state.archive(task, self.config.history_limit);
            drop(state);
            tracing::info!(task_id = %task_id, "queued task cancelled");
            self.event_bus.publish(event).await;
            self.notify_terminal();
            return Ok(TaskStatus::Cancelled);
        }

        if let Some(running) = state.running.get(&task_id) {
            running.cancel.cancel();
            tracing::info!(task_id = %task_id, "cancellation requested for running task");
            return Ok(TaskStatus::Running);
        }

        match state.history.iter().rev().find(|t| t.id == task_id) {
            Some(task) => Err(DomainError::InvalidStateTransition {
                from: task.status.as_str().to_string(),
                to: TaskStatus::Cancelled.as_str().to_string(),
                reason: format!("task {task_id} already finished"),
            }),
            None => Err(DomainError::TaskNotFound(task_id)),
        }
    }

    /// Wait for a task to reach a terminal status. `Ok(None)` on timeout.
    pub async fn wait_for_terminal(
        &self,
        task_id: Uuid,
        timeout: Duration,
    ) -> DomainResult<Option<Task>> {
        let mut rx = self.terminal_tx.subscribe();
        let wait = async {
            loop {
                match self.status(task_id).await {
                    None => return Err(DomainError::TaskNotFound(task_id)),
                    Some(task) if task.is_terminal() => return Ok(task),
                    Some(_) => {}
                }
                if rx.changed().await.is_err() {
                    return Err(DomainError::ExecutionFailed(
                        "dispatcher terminated while waiting".to_string(),
                    ));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Retire the longest-idle worker past the timeout, keeping `min_workers`.
    pub async fn reap_idle_worker(&self) -> Option<WorkerId> {
        let (worker, pool_size) = {
            let mut state = self.state.lock().await;
            let worker = state.pool.reap_idle(Instant::now())?;
            (worker, state.pool.size())
        };

        tracing::info!(worker = %worker, pool_size, "retired idle worker");
        self.event_bus
            .publish(event_factory::worker_event(EventPayload::WorkerRetired {
                worker: worker.to_string(),
                pool_size,
            }))
            .await;
        Some(worker)
    }

    /// Drive the dispatch loop until `cancel` fires. Returns an error only
    /// for failures of the loop itself.
    pub async fn run(&self, cancel: CancellationToken) -> DomainResult<()> {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            tick_interval_ms = u64::try_from(self.config.tick_interval.as_millis()).unwrap_or(u64::MAX),
            "dispatch loop started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("dispatch loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {}
                () = self.wakeup.notified() => {}
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "dispatch loop failed");
                return Err(e);
            }
            self.reap_idle_worker().await;
        }
    }

    /// Stop accepting work, cancel queued tasks, give running tasks up to the
    /// drain timeout, then cancel whatever is left and retire the pool.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut events = Vec::new();
        let (cancelled_queued, in_flight) = {
            let mut state = self.state.lock().await;
            state.accepting = false;
            let queued = state.queue.drain();
            let cancelled = queued.len();
            for mut task in queued {
                if task.cancel("orchestrator shutdown").is_ok() {
                    events.push(Self::terminal_event(&task));
                    state.archive(task, self.config.history_limit);
                }
            }
            (cancelled, state.running.len())
        };
        self.event_bus.publish_all(events).await;
        self.notify_terminal();
        tracing::info!(cancelled_queued, in_flight, "dispatcher draining");

        let mut rx = self.terminal_tx.subscribe();
        let drain = async {
            loop {
                if self.state.lock().await.running.is_empty() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(self.config.drain_timeout, drain).await;

        let mut events = Vec::new();
        let forced = {
            let mut state = self.state.lock().await;
            let ids: Vec<Uuid> = state.running.keys().copied().collect();
            for id in &ids {
                let Some(mut running) = state.running.remove(id) else {
                    continue;
                };
                running.cancel.cancel();
                running.handle.abort();
                if let Some(worker) = running.task.worker {
                    let _ = state.pool.release(worker, *id);
                }
                let reason = format!(
                    "not finished within drain timeout of {}s",
                    self.config.drain_timeout.as_secs()
                );
                if running.task.cancel(reason).is_ok() {
                    events.push(Self::terminal_event(&running.task));
                }
                tracing::warn!(task_id = %id, "task force-cancelled at shutdown");
                state.archive(running.task, self.config.history_limit);
            }
            let retired = state.pool.retire_all();
            tracing::debug!(workers = retired.len(), "pool retired");
            ids
        };
        self.event_bus.publish_all(events).await;
        self.notify_terminal();

        ShutdownReport {
            cancelled_queued,
            drained: in_flight.saturating_sub(forced.len()),
            forced,
        }
    }

    pub async fn is_accepting(&self) -> bool {
        self.state.lock().await.accepting
    }

    /// Queued tasks in dispatch order.
    pub async fn queued_tasks(&self) -> Vec<Task> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn running_tasks(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state.running.values().map(|r| r.task.clone()).collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }

    /// Most recent terminal tasks, newest first.
    pub async fn history(&self, limit: usize) -> Vec<Task> {
        let state = self.state.lock().await;
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.state.lock().await.pool.snapshot()
    }

    pub async fn metrics(&self) -> OrchestratorMetrics {
        let state = self.state.lock().await;
        state.metrics.snapshot(
            state.pool.size(),
            state.pool.busy_count(),
            state.queue.len(),
            state.running.len(),
        )
    }

    /// Scale the pool down by one specific idle worker.
    pub async fn scale_down(&self, worker: WorkerId) -> DomainResult<()> {
        let pool_size = {
            let mut state = self.state.lock().await;
            state
                .pool
                .scale_down(worker)
                .map_err(|e| DomainError::ValidationFailed(e.to_string()))?;
            state.pool.size()
        };
        self.event_bus
            .publish(event_factory::worker_event(EventPayload::WorkerRetired {
                worker: worker.to_string(),
                pool_size,
            }))
            .await;
        Ok(())
    }

    /// True when the queue is sorted by priority with FIFO ties.
    pub async fn queue_is_ordered(&self) -> bool {
        self.state.lock().await.queue.is_ordered()
    }
}

#[async_trait]
impl TaskSink for Dispatcher {
    async fn submit(&self, request: TaskRequest) -> DomainResult<Uuid> {
        self.submit_request(request).await
    }

    async fn task(&self, task_id: Uuid) -> Option<Task> {
        self.status(task_id).await
    }

    async fn wait_for_terminal(&self, task_id: Uuid, timeout: Duration) -> DomainResult<Option<Task>> {
        Dispatcher::wait_for_terminal(self, task_id, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::executors::mock::MockExecutor;
    use crate::domain::models::{TestOutcome, TestPayload};
    use crate::services::event_bus::EventBusConfig;

    fn dispatcher_with(executor: MockExecutor, min: usize, max: usize) -> Dispatcher {
        let config = DispatcherConfig {
            tick_interval: Duration::from_millis(10),
            max_queue_size: 3,
            task_timeout: Some(Duration::from_secs(5)),
            drain_timeout: Duration::from_secs(1),
            history_limit: 100,
            metrics_window: 100,
        };
        let bounds = PoolBounds {
            min_workers: min,
            max_workers: max,
            idle_timeout: Duration::from_secs(60),
        };
        Dispatcher::new(
            config,
            bounds,
            Arc::new(executor),
            Arc::new(EventBus::new(EventBusConfig::default())),
        )
    }

    fn test_payload() -> TaskPayload {
        TaskPayload::Test(TestPayload::default())
    }

    #[tokio::test]
    async fn test_enqueue_rejects_mismatched_payload() {
        let dispatcher = dispatcher_with(MockExecutor::new(), 1, 1);
        let result = dispatcher
            .enqueue(TaskKind::Fix, TaskPriority::High, test_payload())
            .await;
        assert!(matches!(result, Err(DomainError::ValidationFailed(_))));
        assert!(dispatcher.queued_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_tick_on_empty_queue_is_idempotent() {
        let dispatcher = dispatcher_with(MockExecutor::new(), 2, 4);
        let mut rx = dispatcher.event_bus.subscribe();
        let before = dispatcher.workers().await;

        let report = dispatcher.tick().await.unwrap();
        assert!(report.is_idle());
        assert_eq!(dispatcher.workers().await, before);
        assert!(rx.try_recv().is_err(), "no events on an idle tick");
        assert_eq!(dispatcher.event_bus.current_sequence().0, 0);
    }

    #[tokio::test]
    async fn test_start_order_follows_priority() {
        let executor = MockExecutor::new();
        let dispatcher = dispatcher_with(executor.clone(), 3, 3);

        let low = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        let critical = dispatcher
            .enqueue(TaskKind::Test, TaskPriority::Critical, test_payload())
            .await
            .unwrap();
        let high = dispatcher.enqueue(TaskKind::Test, TaskPriority::High, test_payload()).await.unwrap();

        let report = dispatcher.tick().await.unwrap();
        let order: Vec<Uuid> = report.started.iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![critical, high, low]);
    }

    #[tokio::test]
    async fn test_scale_up_when_starved_by_one_worker_per_tick() {
        let executor = MockExecutor::new().with_delay(Duration::from_secs(10));
        let dispatcher = dispatcher_with(executor, 1, 3);

        for _ in 0..4 {
            dispatcher.enqueue(TaskKind::Test, TaskPriority::Medium, test_payload()).await.unwrap();
        }

        let first = dispatcher.tick().await.unwrap();
        assert_eq!(first.started.len(), 2, "existing worker plus one new worker");
        assert!(first.spawned.is_some());

        let second = dispatcher.tick().await.unwrap();
        assert_eq!(second.started.len(), 1);

        let third = dispatcher.tick().await.unwrap();
        assert!(third.is_idle(), "pool is at max_workers");
        assert_eq!(dispatcher.metrics().await.pool_size, 3);
        assert_eq!(dispatcher.queued_tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_recorded() {
        let executor = MockExecutor::new().failing_kind(TaskKind::Analysis, "analyzer offline");
        let dispatcher = dispatcher_with(executor, 2, 2);

        let bad = dispatcher
            .enqueue(TaskKind::Analysis, TaskPriority::High, TaskPayload::default_for(TaskKind::Analysis))
            .await
            .unwrap();
        let good = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        dispatcher.tick().await.unwrap();

        let bad = dispatcher.wait_for_terminal(bad, Duration::from_secs(2)).await.unwrap().unwrap();
        let good = dispatcher.wait_for_terminal(good, Duration::from_secs(2)).await.unwrap().unwrap();

        assert_eq!(bad.status, TaskStatus::Failed);
        assert_eq!(bad.error.as_deref(), Some("analyzer offline"));
        assert_eq!(good.status, TaskStatus::Completed);

        let metrics = dispatcher.metrics().await;
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.completed, 1);
        assert!((metrics.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.active_workers, 0);
    }

    #[tokio::test]
    async fn test_executor_panic_becomes_failure() {
        let executor = MockExecutor::new().panicking_kind(TaskKind::Report);
        let dispatcher = dispatcher_with(executor, 1, 1);
        let id = dispatcher
            .enqueue(TaskKind::Report, TaskPriority::Low, TaskPayload::default_for(TaskKind::Report))
            .await
            .unwrap();
        dispatcher.tick().await.unwrap();

        let task = dispatcher.wait_for_terminal(id, Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("panicked"));
        assert!(!dispatcher.workers().await[0].busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_timeout_becomes_failure() {
        let executor = MockExecutor::new().with_delay(Duration::from_secs(60)).ignoring_cancellation();
        let dispatcher = dispatcher_with(executor, 1, 1);
        let id = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        dispatcher.tick().await.unwrap();

        let task = dispatcher.wait_for_terminal(id, Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancel_queued_and_running() {
        let executor = MockExecutor::new().with_delay(Duration::from_secs(30));
        let dispatcher = dispatcher_with(executor, 1, 1);

        let running = dispatcher.enqueue(TaskKind::Test, TaskPriority::High, test_payload()).await.unwrap();
        let queued = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        dispatcher.tick().await.unwrap();

        assert_eq!(dispatcher.cancel(queued).await.unwrap(), TaskStatus::Cancelled);
        assert_eq!(dispatcher.status(queued).await.unwrap().status, TaskStatus::Cancelled);

        assert_eq!(dispatcher.cancel(running).await.unwrap(), TaskStatus::Running);
        let task = dispatcher
            .wait_for_terminal(running, Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);

        assert!(dispatcher.cancel(running).await.is_err());
        assert!(matches!(
            dispatcher.cancel(Uuid::new_v4()).await,
            Err(DomainError::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_backpressure_warns_but_accepts() {
        let dispatcher = dispatcher_with(MockExecutor::new(), 1, 1);
        let mut rx = dispatcher.event_bus.subscribe();
        for _ in 0..5 {
            dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        }
        assert_eq!(dispatcher.queued_tasks().await.len(), 5);

        let mut backpressure = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event.payload, EventPayload::QueueBackpressure { .. }) {
                backpressure += 1;
            }
        }
        assert_eq!(backpressure, 2);
    }

    #[tokio::test]
    async fn test_lifecycle_forwarded_for_completed_and_failed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let executor = MockExecutor::new().with_test_outcome(TestOutcome {
            passed: 1,
            ..TestOutcome::default()
        });
        let dispatcher = dispatcher_with(executor, 1, 1).with_lifecycle_channel(tx);

        let id = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        dispatcher.tick().await.unwrap();
        dispatcher.wait_for_terminal(id, Duration::from_secs(2)).await.unwrap();

        let lifecycle = rx.recv().await.unwrap();
        assert_eq!(lifecycle.event, LifecycleEvent::Completed);
        assert_eq!(lifecycle.task.id, id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_then_forces() {
        let executor = MockExecutor::new()
            .with_delay(Duration::from_secs(600))
            .ignoring_cancellation();
        let dispatcher = dispatcher_with(executor, 1, 1);

        let running = dispatcher.enqueue(TaskKind::Test, TaskPriority::High, test_payload()).await.unwrap();
        let queued = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        dispatcher.tick().await.unwrap();

        let report = dispatcher.shutdown().await;
        assert_eq!(report.cancelled_queued, 1);
        assert_eq!(report.forced, vec![running]);
        assert_eq!(report.drained, 0);

        assert_eq!(dispatcher.status(running).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(dispatcher.status(queued).await.unwrap().status, TaskStatus::Cancelled);
        assert!(matches!(
            dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await,
            Err(DomainError::ShuttingDown)
        ));
        assert!(dispatcher.workers().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_until_cancelled() {
        let dispatcher = dispatcher_with(MockExecutor::new(), 1, 2);
        let cancel = CancellationToken::new();
        let loop_handle = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(cancel).await })
        };

        let id = dispatcher.enqueue(TaskKind::Test, TaskPriority::Low, test_payload()).await.unwrap();
        let task = dispatcher.wait_for_terminal(id, Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        cancel.cancel();
        assert!(loop_handle.await.unwrap().is_ok());
    }
}
