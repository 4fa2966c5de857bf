//! Workflow engine.
//!
//! Runs registered workflow definitions step by step against a shared
//! context. Each step gets a retry budget with exponential backoff; the
//! first step that exhausts its budget fails the execution and leaves the
//! remaining steps pending. Definitions marked parallel start every step at
//! once and complete only if every step does.
//!
//! The engine also reacts to task lifecycle notifications from the
//! dispatcher, choosing a workflow through the [`WorkflowPolicy`] table.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::builtin_workflows::builtin_workflows;
use super::dispatcher::TaskLifecycle;
use super::event_bus::{EventBus, EventPayload, EventSeverity};
use super::event_factory;
use super::step_registry::StepRegistry;
use super::workflow_policy::WorkflowPolicy;
use crate::domain::errors::{DomainError, DomainResult, StepError};
use crate::domain::models::{
    ExecutionStatus, FixPayload, HookDefinition, LifecycleEvent, StepDefinition, Task, TaskKind,
    TaskPayload, TaskPriority, TaskSource, WorkflowConfig, WorkflowContext, WorkflowDefinition,
    WorkflowExecution, WorkflowTrigger,
};
use crate::domain::ports::{StepInput, TaskRequest, TaskSink};

/// Source name carried by follow-up fix tasks.
pub const FOLLOWUP_SOURCE: &str = "followup";

#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    pub default_retry_attempts: u32,
    pub backoff_unit: Duration,
    pub max_history: usize,
    pub auto_trigger: bool,
    pub auto_create_followup_task: bool,
}

impl From<&WorkflowConfig> for WorkflowEngineConfig {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            default_retry_attempts: config.default_retry_attempts,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
            max_history: config.max_history,
            auto_trigger: config.auto_trigger,
            auto_create_followup_task: config.auto_create_followup_task,
        }
    }
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

/// What the engine did in response to one task lifecycle notification.
#[derive(Debug, Clone, Default)]
pub struct TriggerOutcome {
    pub followup_task: Option<Uuid>,
    pub execution: Option<WorkflowExecution>,
}

pub struct WorkflowEngine {
    definitions: RwLock<BTreeMap<String, WorkflowDefinition>>,
    registry: Arc<StepRegistry>,
    policy: WorkflowPolicy,
    sink: Arc<dyn TaskSink>,
    event_bus: Arc<EventBus>,
    config: WorkflowEngineConfig,
    history: RwLock<VecDeque<WorkflowExecution>>,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<StepRegistry>,
        policy: WorkflowPolicy,
        sink: Arc<dyn TaskSink>,
        event_bus: Arc<EventBus>,
        config: WorkflowEngineConfig,
    ) -> Self {
        Self {
            definitions: RwLock::new(BTreeMap::new()),
            registry,
            policy,
            sink,
            event_bus,
            config,
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn policy(&self) -> &WorkflowPolicy {
        &self.policy
    }

    /// Register a definition. Every step and hook must name a known handler.
    pub async fn register(&self, definition: WorkflowDefinition) -> DomainResult<()> {
        definition.validate()?;
        for step in &definition.steps {
            let hooks = step.on_success.iter().chain(step.on_failure.iter());
            for handler in std::iter::once(&step.handler).chain(hooks.map(|h| &h.handler)) {
                if !self.registry.contains(handler) {
                    return Err(DomainError::ValidationFailed(format!(
                        "workflow '{}' step '{}' uses unknown handler '{handler}'",
                        definition.name, step.name
                    )));
                }
            }
        }

        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(&definition.name) {
            return Err(DomainError::DuplicateWorkflow(definition.name));
        }
        tracing::debug!(workflow = %definition.name, steps = definition.steps.len(), "registered workflow");
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub async fn register_builtins(&self) -> DomainResult<()> {
        for definition in builtin_workflows() {
            self.register(definition).await?;
        }
        Ok(())
    }

    /// Registered definitions, sorted by name.
    pub async fn definitions(&self) -> Vec<WorkflowDefinition> {
        self.definitions.read().await.values().cloned().collect()
    }

    pub async fn definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    /// Most recent executions, newest first.
    pub async fn execution_history(&self, limit: usize) -> Vec<WorkflowExecution> {
        self.history.read().await.iter().rev().take(limit).cloned().collect()
    }

    /// Run a workflow to completion. Step failures are reported in the
    /// returned execution; `Err` means the workflow could not be run at all.
    pub async fn execute_workflow(
        &self,
        name: &str,
        trigger: WorkflowTrigger,
        data: Value,
    ) -> DomainResult<WorkflowExecution> {
        let definition = self
            .definition(name)
            .await
            .ok_or_else(|| DomainError::WorkflowNotFound(name.to_string()))?;

        let mut execution = WorkflowExecution::new(&definition, trigger, data);
        tracing::info!(
            execution_id = %execution.id,
            workflow = name,
            trigger = trigger.as_str(),
            steps = definition.steps.len(),
            parallel = definition.parallel,
            "workflow started"
        );
        self.emit(
            EventSeverity::Info,
            execution.id,
            EventPayload::WorkflowStarted {
                execution_id: execution.id,
                workflow: name.to_string(),
                trigger: trigger.as_str().to_string(),
            },
        )
        .await;

        if definition.parallel {
            self.run_parallel(&definition, &mut execution).await?;
        } else {
            self.run_sequential(&definition, &mut execution).await?;
        }

        match execution.status {
            ExecutionStatus::Completed => {
                tracing::info!(execution_id = %execution.id, workflow = name, duration_ms = execution.duration_ms(), "workflow completed");
                self.emit(
                    EventSeverity::Info,
                    execution.id,
                    EventPayload::WorkflowCompleted {
                        execution_id: execution.id,
                        workflow: name.to_string(),
                        duration_ms: execution.duration_ms(),
                    },
                )
                .await;
            }
            _ => {
                let error = execution.error.clone().unwrap_or_default();
                tracing::warn!(execution_id = %execution.id, workflow = name, error = %error, "workflow failed");
                self.emit(
                    EventSeverity::Error,
                    execution.id,
                    EventPayload::WorkflowFailed {
                        execution_id: execution.id,
                        workflow: name.to_string(),
                        error,
                    },
                )
                .await;
            }
        }

        self.record(execution.clone()).await;
        Ok(execution)
    }

    async fn run_sequential(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> DomainResult<()> {
        for (index, step) in definition.steps.iter().enumerate() {
            if let Some(condition) = &step.condition {
                if !condition.evaluate(&execution.context) {
                    execution.steps[index].skip()?;
                    self.step_skipped(execution.id, &step.name).await;
                    continue;
                }
            }

            execution.steps[index].start()?;
            let (result, attempts) = self
                .run_step(&definition.name, step, &execution.context, execution.id)
                .await;

            match result {
                Ok(value) => {
                    execution.context.results.insert(step.name.clone(), value.clone());
                    execution.steps[index].complete(value, attempts)?;
                    self.step_completed(execution.id, &step.name, attempts).await;
                    self.run_hook(step.on_success.as_ref(), &definition.name, step, &execution.context)
                        .await;
                }
                Err(error) => {
                    let message = error.to_string();
                    execution.context.errors.insert(step.name.clone(), message.clone());
                    execution.steps[index].fail(message.clone(), attempts)?;
                    self.step_failed(execution.id, &step.name, attempts, &message).await;
                    self.run_hook(step.on_failure.as_ref(), &definition.name, step, &execution.context)
                        .await;
                    execution.finish(
                        ExecutionStatus::Failed,
                        Some(format!("step '{}' failed: {message}", step.name)),
                    );
                    return Ok(());
                }
            }
        }

        execution.finish(ExecutionStatus::Completed, None);
        Ok(())
    }

    /// Start every step at once. Conditions see the initial context only.
    async fn run_parallel(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
    ) -> DomainResult<()> {
        let initial = execution.context.clone();
        let execution_id = execution.id;

        let mut runnable = Vec::with_capacity(definition.steps.len());
        for (index, step) in definition.steps.iter().enumerate() {
            let runs = step.condition.as_ref().is_none_or(|c| c.evaluate(&initial));
            if runs {
                execution.steps[index].start()?;
            }
            runnable.push(runs);
        }

        let pending = definition
            .steps
            .iter()
            .zip(runnable.iter())
            .map(|(step, &runs)| {
                let initial = &initial;
                async move {
                    if runs {
                        Some(self.run_step(&definition.name, step, initial, execution_id).await)
                    } else {
                        None
                    }
                }
            });
        let results = futures::future::join_all(pending).await;

        let mut failed = Vec::new();
        for ((index, step), result) in definition.steps.iter().enumerate().zip(results) {
            match result {
                None => {
                    execution.steps[index].skip()?;
                    self.step_skipped(execution_id, &step.name).await;
                }
                Some((Ok(value), attempts)) => {
                    execution.context.results.insert(step.name.clone(), value.clone());
                    execution.steps[index].complete(value, attempts)?;
                    self.step_completed(execution_id, &step.name, attempts).await;
                    self.run_hook(step.on_success.as_ref(), &definition.name, step, &execution.context)
                        .await;
                }
                Some((Err(error), attempts)) => {
                    let message = error.to_string();
                    execution.context.errors.insert(step.name.clone(), message.clone());
                    execution.steps[index].fail(message.clone(), attempts)?;
                    self.step_failed(execution_id, &step.name, attempts, &message).await;
                    self.run_hook(step.on_failure.as_ref(), &definition.name, step, &execution.context)
                        .await;
                    failed.push(step.name.clone());
                }
            }
        }

        if failed.is_empty() {
            execution.finish(ExecutionStatus::Completed, None);
        } else {
            execution.finish(
                ExecutionStatus::Failed,
                Some(format!("steps failed: {}", failed.join(", "))),
            );
        }
        Ok(())
    }

    /// Run one step with its retry budget. Returns the final result and the
    /// number of attempts made.
    async fn run_step(
        &self,
        workflow: &str,
        step: &StepDefinition,
        context: &WorkflowContext,
        execution_id: Uuid,
    ) -> (Result<Value, StepError>, u32) {
        let Some(handler) = self.registry.get(&step.handler) else {
            return (Err(StepError::UnknownHandler(step.handler.clone())), 1);
        };
        let budget = step.retry_attempts.unwrap_or(self.config.default_retry_attempts);

        let mut attempt = 0;
        loop {
            let input = StepInput {
                workflow,
                step: &step.name,
                params: &step.params,
                context,
                attempt,
            };
            let result = match step.timeout() {
                Some(limit) => tokio::time::timeout(limit, handler.run(input))
                    .await
                    .unwrap_or_else(|_| Err(StepError::TimedOut(limit))),
                None => handler.run(input).await,
            };

            match result {
                Ok(value) => return (Ok(value), attempt + 1),
                Err(error) if attempt < budget => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        workflow,
                        step = %step.name,
                        attempt = attempt + 1,
                        max_attempts = budget + 1,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "step failed, retrying"
                    );
                    self.emit(
                        EventSeverity::Warning,
                        execution_id,
                        EventPayload::WorkflowStepRetrying {
                            execution_id,
                            step: step.name.clone(),
                            attempt: attempt + 1,
                            max_attempts: budget + 1,
                            error: error.to_string(),
                        },
                    )
                    .await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return (Err(error), attempt + 1),
            }
        }
    }

    /// Backoff before retry `attempt + 1`: one unit doubled per prior attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Hooks run once, without retries. Their failures are only logged.
    async fn run_hook(
        &self,
        hook: Option<&HookDefinition>,
        workflow: &str,
        step: &StepDefinition,
        context: &WorkflowContext,
    ) {
        let Some(hook) = hook else { return };
        let Some(handler) = self.registry.get(&hook.handler) else {
            tracing::warn!(workflow, step = %step.name, handler = %hook.handler, "hook handler not registered");
            return;
        };
        let input = StepInput {
            workflow,
            step: &step.name,
            params: &hook.params,
            context,
            attempt: 0,
        };
        if let Err(e) = handler.run(input).await {
            tracing::warn!(workflow, step = %step.name, handler = %hook.handler, error = %e, "step hook failed");
        }
    }

    async fn record(&self, execution: WorkflowExecution) {
        let mut history = self.history.write().await;
        history.push_back(execution);
        while history.len() > self.config.max_history.max(1) {
            history.pop_front();
        }
    }

    async fn emit(&self, severity: EventSeverity, execution_id: Uuid, payload: EventPayload) {
        self.event_bus
            .publish(event_factory::workflow_event(severity, execution_id, payload))
            .await;
    }

    async fn step_skipped(&self, execution_id: Uuid, step: &str) {
        tracing::debug!(execution_id = %execution_id, step, "step skipped; condition not met");
        self.emit(
            EventSeverity::Debug,
            execution_id,
            EventPayload::WorkflowStepSkipped {
                execution_id,
                step: step.to_string(),
            },
        )
        .await;
    }

    async fn step_completed(&self, execution_id: Uuid, step: &str, attempts: u32) {
        tracing::debug!(execution_id = %execution_id, step, attempts, "step completed");
        self.emit(
            EventSeverity::Info,
            execution_id,
            EventPayload::WorkflowStepCompleted {
                execution_id,
                step: step.to_string(),
                attempts,
            },
        )
        .await;
    }

    async fn step_failed(&self, execution_id: Uuid, step: &str, attempts: u32, error: &str) {
        tracing::warn!(execution_id = %execution_id, step, attempts, error, "step failed");
        self.emit(
            EventSeverity::Error,
            execution_id,
            EventPayload::WorkflowStepFailed {
                execution_id,
                step: step.to_string(),
                attempts,
                error: error.to_string(),
            },
        )
        .await;
    }

    /// React to a task reaching `completed` or `failed`.
    ///
    /// Tasks produced by workflows are ignored so workflows never trigger
    /// each other through their own tasks.
    pub async fn handle_lifecycle(
        &self,
        event: LifecycleEvent,
        task: &Task,
    ) -> DomainResult<TriggerOutcome> {
        let mut outcome = TriggerOutcome::default();
        if !task.source.triggers_workflows() {
            tracing::trace!(task_id = %task.id, "workflow-produced task; no auto-trigger");
            return Ok(outcome);
        }

        if event == LifecycleEvent::Failed
            && self.config.auto_create_followup_task
            && task.priority == TaskPriority::Critical
            && task.kind != TaskKind::Fix
        {
            outcome.followup_task = Some(self.create_followup(task).await?);
        }

        if !self.config.auto_trigger {
            return Ok(outcome);
        }
        let Some(name) = self.policy.select(event, task) else {
            return Ok(outcome);
        };
        let Some(definition) = self.definition(name).await else {
            tracing::warn!(workflow = name, task_id = %task.id, "policy selected an unregistered workflow");
            return Ok(outcome);
        };

        tracing::info!(workflow = name, task_id = %task.id, event = event.as_str(), "auto-triggering workflow");
        let data = json!({
            "task_id": task.id.to_string(),
            "kind": task.kind.as_str(),
            "priority": task.priority.as_str(),
            "status": task.status.as_str(),
            "error": task.error,
            "files": task.payload.files(),
            "outcome": task.result,
        });
        outcome.execution = Some(self.execute_workflow(name, definition.trigger, data).await?);
        Ok(outcome)
    }

    async fn create_followup(&self, task: &Task) -> DomainResult<Uuid> {
        let payload = TaskPayload::Fix(FixPayload {
            task_id: Some(task.id),
            error: task.error.clone(),
            files: task.payload.files().to_vec(),
        });
        let request = TaskRequest::new(TaskPriority::High, payload)
            .from_source(TaskSource::Workflow(FOLLOWUP_SOURCE.to_string()));
        let id = self.sink.submit(request).await?;
        tracing::info!(task_id = %id, failed_task = %task.id, "enqueued follow-up fix task");
        Ok(id)
    }

    /// Consume lifecycle notifications until `cancel` fires or the channel
    /// closes. Each triggered workflow runs on its own task.
    pub fn spawn_trigger_listener(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<TaskLifecycle>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    message = rx.recv() => {
                        let Some(lifecycle) = message else { break };
                        let engine = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = engine.handle_lifecycle(lifecycle.event, &lifecycle.task).await {
                                tracing::warn!(task_id = %lifecycle.task.id, error = %e, "auto-triggered workflow could not run");
                            }
                        });
                    }
                }
            }
            tracing::debug!("workflow trigger listener stopped");
        })
    }
}
