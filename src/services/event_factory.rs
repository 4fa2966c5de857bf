//! Centralized event construction helpers.
//!
//! Sequence is set to 0 (assigned by EventBus on publish) and the
//! timestamp to `Utc::now()`.

use chrono::Utc;
use uuid::Uuid;

use super::event_bus::{
    EventCategory, EventId, EventPayload, EventSeverity, SequenceNumber, UnifiedEvent,
};

/// Build a `UnifiedEvent` with standard defaults.
pub fn make_event(
    severity: EventSeverity,
    category: EventCategory,
    task_id: Option<Uuid>,
    correlation_id: Option<Uuid>,
    payload: EventPayload,
) -> UnifiedEvent {
    UnifiedEvent {
        id: EventId::new(),
        sequence: SequenceNumber(0),
        timestamp: Utc::now(),
        severity,
        category,
        task_id,
        correlation_id,
        payload,
    }
}

pub fn orchestrator_event(severity: EventSeverity, payload: EventPayload) -> UnifiedEvent {
    make_event(severity, EventCategory::Orchestrator, None, None, payload)
}

pub fn task_event(severity: EventSeverity, task_id: Uuid, payload: EventPayload) -> UnifiedEvent {
    make_event(severity, EventCategory::Task, Some(task_id), None, payload)
}

pub fn worker_event(payload: EventPayload) -> UnifiedEvent {
    make_event(EventSeverity::Debug, EventCategory::Worker, None, None, payload)
}

/// Workflow events are correlated by execution id.
pub fn workflow_event(
    severity: EventSeverity,
    execution_id: Uuid,
    payload: EventPayload,
) -> UnifiedEvent {
    make_event(severity, EventCategory::Workflow, None, Some(execution_id), payload)
}

pub fn schedule_event(
    severity: EventSeverity,
    task_id: Option<Uuid>,
    payload: EventPayload,
) -> UnifiedEvent {
    make_event(severity, EventCategory::Schedule, task_id, None, payload)
}

pub fn change_event(
    severity: EventSeverity,
    task_id: Option<Uuid>,
    payload: EventPayload,
) -> UnifiedEvent {
    make_event(severity, EventCategory::Change, task_id, None, payload)
}
