//! Named step handlers for workflow definitions.
//!
//! Workflow steps reference handlers by name so definitions stay plain,
//! serializable data. The built-in handlers either enqueue a task through
//! the [`TaskSink`] and wait for it, or operate on the workflow context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::domain::errors::StepError;
use crate::domain::models::{TaskKind, TaskPayload, TaskPriority, TaskSource, TaskStatus};
use crate::domain::ports::{StepHandler, StepInput, TaskRequest, TaskSink};

pub const RUN_TESTS: &str = "run_tests";
pub const RUN_ANALYSIS: &str = "run_analysis";
pub const RUN_FIX: &str = "run_fix";
pub const RUN_REPORT: &str = "run_report";
pub const CHECK_CRITICAL_FAILURES: &str = "check_critical_failures";
pub const RECORD: &str = "record";
pub const NOTIFY: &str = "notify";
pub const FAIL: &str = "fail";

/// Registry of step handlers, keyed by handler name.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in handler.
    pub fn with_builtins(sink: Arc<dyn TaskSink>, wait_timeout: Duration) -> Self {
        let mut registry = Self::new();
        for (name, kind) in [
            (RUN_TESTS, TaskKind::Test),
            (RUN_ANALYSIS, TaskKind::Analysis),
            (RUN_FIX, TaskKind::Fix),
            (RUN_REPORT, TaskKind::Report),
        ] {
            registry.register(
                name,
                Arc::new(TaskStepHandler::new(kind, Arc::clone(&sink), wait_timeout)),
            );
        }
        registry.register(CHECK_CRITICAL_FAILURES, Arc::new(CheckCriticalFailures));
        registry.register(RECORD, Arc::new(RecordHandler { notify: false }));
        registry.register(NOTIFY, Arc::new(RecordHandler { notify: true }));
        registry.register(FAIL, Arc::new(FailHandler));
        registry
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) -> Option<Arc<dyn StepHandler>> {
        self.handlers.insert(name.into(), handler)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry").field("handlers", &self.names()).finish()
    }
}

/// Enqueues a task of a fixed kind and waits for its terminal state.
///
/// Params:
/// - `payload`: object merged into the task payload
/// - `priority`: `low` | `medium` | `high` | `critical` (default `medium`)
///
/// `files`, `error` and `task_id` are copied from the trigger data when the
/// payload does not set them.
pub struct TaskStepHandler {
    kind: TaskKind,
    sink: Arc<dyn TaskSink>,
    wait_timeout: Duration,
}

impl TaskStepHandler {
    pub fn new(kind: TaskKind, sink: Arc<dyn TaskSink>, wait_timeout: Duration) -> Self {
        Self {
            kind,
            sink,
            wait_timeout,
        }
    }

    fn build_payload(&self, input: &StepInput<'_>) -> Result<TaskPayload, StepError> {
        let mut body = match input.params.get("payload") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        let data = &input.context.data;
        for key in ["files", "error", "task_id"] {
            if body.contains_key(key) {
                continue;
            }
            match data.get(key) {
                Some(value @ Value::Array(_)) if key == "files" => {
                    body.insert(key.to_string(), value.clone());
                }
                Some(value @ Value::String(_)) if key != "files" => {
                    body.insert(key.to_string(), value.clone());
                }
                _ => {}
            }
        }
        if self.kind == TaskKind::Report && !body.contains_key("title") {
            body.insert(
                "title".to_string(),
                Value::String(format!("{}: {}", input.workflow, input.step)),
            );
        }
        body.insert("kind".to_string(), Value::String(self.kind.as_str().to_string()));

        serde_json::from_value(Value::Object(body)).map_err(|e| {
            StepError::failed(format!("invalid {} payload for step '{}': {e}", self.kind, input.step))
        })
    }
}

#[async_trait]
impl StepHandler for TaskStepHandler {
    async fn run(&self, input: StepInput<'_>) -> Result<Value, StepError> {
        let payload = self.build_payload(&input)?;
        let priority = input
            .params
            .get("priority")
            .and_then(Value::as_str)
            .and_then(TaskPriority::from_str)
            .unwrap_or_default();

        let request = TaskRequest::new(priority, payload)
            .from_source(TaskSource::Workflow(input.workflow.to_string()));
        let task_id = self
            .sink
            .submit(request)
            .await
            .map_err(|e| StepError::failed(e.to_string()))?;
        tracing::debug!(workflow = input.workflow, step = input.step, task_id = %task_id, "step enqueued task");

        let task = self
            .sink
            .wait_for_terminal(task_id, self.wait_timeout)
            .await
            .map_err(|e| StepError::failed(e.to_string()))?
            .ok_or(StepError::TimedOut(self.wait_timeout))?;

        if task.status != TaskStatus::Completed {
            return Err(StepError::failed(task.error.unwrap_or_else(|| {
                format!("task {task_id} finished as {}", task.status.as_str())
            })));
        }

        let flagged = task.result.as_ref().is_some_and(|outcome| outcome.is_flagged());
        Ok(json!({
            "task_id": task_id,
            "status": task.status.as_str(),
            "outcome": task.result,
            "flagged": flagged,
        }))
    }
}

/// Fails when the test step named by `params.step` reported failures.
pub struct CheckCriticalFailures;

#[async_trait]
impl StepHandler for CheckCriticalFailures {
    async fn run(&self, input: StepInput<'_>) -> Result<Value, StepError> {
        let Some(step) = input.params.get("step").and_then(Value::as_str) else {
            return Err(StepError::failed("check_critical_failures requires params.step"));
        };
        let Some(result) = input.context.results.get(step) else {
            return Ok(json!({ "checked": false, "step": step }));
        };

        let failed = result.pointer("/outcome/failed").and_then(Value::as_u64).unwrap_or(0);
        if failed > 0 {
            return Err(StepError::failed(format!(
                "{failed} failing tests reported by step '{step}'"
            )));
        }
        Ok(json!({ "checked": true, "step": step, "failed": 0 }))
    }
}

/// Records its params into the context. `notify` also logs the message.
pub struct RecordHandler {
    notify: bool,
}

#[async_trait]
impl StepHandler for RecordHandler {
    async fn run(&self, input: StepInput<'_>) -> Result<Value, StepError> {
        if self.notify {
            let message = input
                .params
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("workflow notification");
            tracing::info!(workflow = input.workflow, step = input.step, failed_steps = input.context.errors.len(), "{message}");
        }
        Ok(json!({
            "step": input.step,
            "params": input.params,
            "trigger": input.context.trigger,
            "completed_steps": input.context.results.len(),
        }))
    }
}

/// Always fails with `params.message`.
pub struct FailHandler;

#[async_trait]
impl StepHandler for FailHandler {
    async fn run(&self, input: StepInput<'_>) -> Result<Value, StepError> {
        let message = input
            .params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("step failed");
        Err(StepError::failed(message))
    }
}
