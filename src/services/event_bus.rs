//! EventBus service for orchestrator event streaming.
//!
//! Provides a broadcast-based event system with sequence numbering and
//! optional persistence to an [`EventStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::event_store::EventStore;
use crate::domain::models::OrchestratorMetrics;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Orchestrator,
    Task,
    Worker,
    Workflow,
    Schedule,
    Change,
}

impl EventCategory {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "orchestrator" => Some(Self::Orchestrator),
            "task" => Some(Self::Task),
            "worker" => Some(Self::Worker),
            "workflow" => Some(Self::Workflow),
            "schedule" => Some(Self::Schedule),
            "change" => Some(Self::Change),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Task => write!(f, "task"),
            Self::Worker => write!(f, "worker"),
            Self::Workflow => write!(f, "workflow"),
            Self::Schedule => write!(f, "schedule"),
            Self::Change => write!(f, "change"),
        }
    }
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub task_id: Option<Uuid>,
    /// Groups events of one workflow execution or schedule fire.
    pub correlation_id: Option<Uuid>,
    pub payload: EventPayload,
}

/// Event payloads for every observable transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    // Orchestrator lifecycle
    OrchestratorStarted {
        min_workers: usize,
        max_workers: usize,
    },
    OrchestratorStopped {
        drained: usize,
        forced: usize,
    },
    StatusUpdate(OrchestratorMetrics),

    // Task lifecycle
    TaskEnqueued {
        task_id: Uuid,
        kind: String,
        priority: String,
        source: String,
    },
    QueueBackpressure {
        queued: usize,
        max_queue_size: usize,
    },
    TaskStarted {
        task_id: Uuid,
        worker: String,
    },
    TaskCompleted {
        task_id: Uuid,
        worker: String,
        duration_ms: Option<u64>,
        summary: String,
    },
    TaskFailed {
        task_id: Uuid,
        worker: Option<String>,
        error: String,
    },
    TaskCancelled {
        task_id: Uuid,
        reason: String,
    },

    // Pool membership
    WorkerSpawned {
        worker: String,
        pool_size: usize,
    },
    WorkerRetired {
        worker: String,
        pool_size: usize,
    },

    // Workflows
    WorkflowStarted {
        execution_id: Uuid,
        workflow: String,
        trigger: String,
    },
    WorkflowStepCompleted {
        execution_id: Uuid,
        step: String,
        attempts: u32,
    },
    WorkflowStepSkipped {
        execution_id: Uuid,
        step: String,
    },
    WorkflowStepRetrying {
        execution_id: Uuid,
        step: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
    },
    WorkflowStepFailed {
        execution_id: Uuid,
        step: String,
        attempts: u32,
        error: String,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        workflow: String,
        duration_ms: Option<u64>,
    },
    WorkflowFailed {
        execution_id: Uuid,
        workflow: String,
        error: String,
    },

    // Schedules
    ScheduleFired {
        schedule: String,
        task_id: Option<Uuid>,
    },
    ScheduleExecutionRecorded {
        schedule: String,
        status: String,
        success_rate: Option<f64>,
    },
    ScheduleOptimizationSuggested {
        schedule: String,
        current_cron: String,
        recommended_cron: String,
        reason: String,
        success_rate: f64,
    },

    // Change watcher
    ChangeDetected {
        commit: String,
        author: String,
        files: usize,
    },
    ChangeAssessed {
        commit: String,
        severity: String,
        block_merge: bool,
    },
    MergeBlocked {
        commit: String,
        task_id: Uuid,
        reason: String,
    },
    FileChanged {
        path: String,
        change: String,
        task_id: Option<Uuid>,
    },
}

impl EventPayload {
    /// Short variant name for display.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::OrchestratorStarted { .. } => "OrchestratorStarted",
            Self::OrchestratorStopped { .. } => "OrchestratorStopped",
            Self::StatusUpdate(_) => "StatusUpdate",
            Self::TaskEnqueued { .. } => "TaskEnqueued",
            Self::QueueBackpressure { .. } => "QueueBackpressure",
            Self::TaskStarted { .. } => "TaskStarted",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::TaskCancelled { .. } => "TaskCancelled",
            Self::WorkerSpawned { .. } => "WorkerSpawned",
            Self::WorkerRetired { .. } => "WorkerRetired",
            Self::WorkflowStarted { .. } => "WorkflowStarted",
            Self::WorkflowStepCompleted { .. } => "WorkflowStepCompleted",
            Self::WorkflowStepSkipped { .. } => "WorkflowStepSkipped",
            Self::WorkflowStepRetrying { .. } => "WorkflowStepRetrying",
            Self::WorkflowStepFailed { .. } => "WorkflowStepFailed",
            Self::WorkflowCompleted { .. } => "WorkflowCompleted",
            Self::WorkflowFailed { .. } => "WorkflowFailed",
            Self::ScheduleFired { .. } => "ScheduleFired",
            Self::ScheduleExecutionRecorded { .. } => "ScheduleExecutionRecorded",
            Self::ScheduleOptimizationSuggested { .. } => "ScheduleOptimizationSuggested",
            Self::ChangeDetected { .. } => "ChangeDetected",
            Self::ChangeAssessed { .. } => "ChangeAssessed",
            Self::MergeBlocked { .. } => "MergeBlocked",
            Self::FileChanged { .. } => "FileChanged",
        }
    }
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
    /// Whether to persist events to storage.
    pub persist_events: bool,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            persist_events: true,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<UnifiedEvent>,
    sequence: AtomicU64,
    store: Option<Arc<dyn EventStore>>,
    config: EventBusConfig,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            store: None,
            config,
        }
    }

    /// Add an event store for persistence.
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish an event, assigning its sequence number.
    pub async fn publish(&self, mut event: UnifiedEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);

        if self.config.persist_events {
            if let Some(ref store) = self.store {
                if let Err(e) = store.append(&event).await {
                    tracing::warn!(error = %e, "failed to persist event");
                }
            }
        }

        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Publish several events in order.
    pub async fn publish_all(&self, events: Vec<UnifiedEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<UnifiedEvent> {
        self.sender.subscribe()
    }

    /// Sequence number the next event will receive.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub fn store(&self) -> Option<Arc<dyn EventStore>> {
        self.store.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
