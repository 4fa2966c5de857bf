//! Task sink port - the only way producers reach the dispatcher.

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskKind, TaskPayload, TaskPriority, TaskSource};

/// A request to enqueue a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub source: TaskSource,
}

impl TaskRequest {
    pub fn new(priority: TaskPriority, payload: TaskPayload) -> Self {
        Self {
            kind: payload.kind(),
            priority,
            payload,
            source: TaskSource::Direct,
        }
    }

    pub fn from_source(mut self, source: TaskSource) -> Self {
        self.source = source;
        self
    }
}

/// Enqueue and status queries, as seen by schedulers, watchers and workflow steps.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn submit(&self, request: TaskRequest) -> DomainResult<Uuid>;

    async fn task(&self, task_id: Uuid) -> Option<Task>;

    /// Wait until the task is terminal. `Ok(None)` means the wait timed out.
    async fn wait_for_terminal(&self, task_id: Uuid, timeout: Duration) -> DomainResult<Option<Task>>;
}
