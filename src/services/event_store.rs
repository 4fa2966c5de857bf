//! EventStore trait for event persistence.
//!
//! Events are kept in memory for tests and appended to a line-delimited
//! JSON file for the audit history read by `conductor history`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::event_bus::{EventCategory, EventSeverity, SequenceNumber, UnifiedEvent};

/// Error type for EventStore operations.
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("Failed to append event: {0}")]
    AppendError(String),

    #[error("Failed to query events: {0}")]
    QueryError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Query parameters for event retrieval.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by minimum sequence number (inclusive).
    pub since_sequence: Option<SequenceNumber>,
    /// Filter by task ID.
    pub task_id: Option<Uuid>,
    /// Filter by correlation ID.
    pub correlation_id: Option<Uuid>,
    /// Filter by category.
    pub category: Option<EventCategory>,
    /// Filter by minimum severity.
    pub min_severity: Option<EventSeverity>,
    /// Maximum number of events to return.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
    /// Sort order (true = oldest first, false = newest first).
    pub ascending: bool,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since_sequence(mut self, seq: SequenceNumber) -> Self {
        self.since_sequence = Some(seq);
        self
    }

    pub fn task_id(mut self, id: Uuid) -> Self {
        self.task_id = Some(id);
        self
    }

    pub fn correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn matches(&self, e: &UnifiedEvent) -> bool {
        self.since_sequence.is_none_or(|seq| e.sequence >= seq)
            && self.task_id.is_none_or(|id| e.task_id == Some(id))
            && self.correlation_id.is_none_or(|id| e.correlation_id == Some(id))
            && self.category.is_none_or(|c| e.category == c)
            && self.min_severity.is_none_or(|s| e.severity >= s)
    }

    /// Filter, order and paginate events given in append order.
    pub fn apply<'a>(&self, events: impl Iterator<Item = &'a UnifiedEvent>) -> Vec<UnifiedEvent> {
        let mut result: Vec<UnifiedEvent> = events.filter(|e| self.matches(e)).cloned().collect();
        if !self.ascending {
            result.reverse();
        }
        result
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

/// Trait for event persistence implementations.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event to the store.
    async fn append(&self, event: &UnifiedEvent) -> Result<(), EventStoreError>;

    /// Query events based on filter criteria.
    async fn query(&self, query: EventQuery) -> Result<Vec<UnifiedEvent>, EventStoreError>;

    /// Count total events in the store.
    async fn count(&self) -> Result<u64, EventStoreError>;
}

/// In-memory event store for testing.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<UnifiedEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &UnifiedEvent) -> Result<(), EventStoreError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<UnifiedEvent>, EventStoreError> {
        let events = self.events.read().await;
        Ok(query.apply(events.iter()))
    }

    async fn count(&self) -> Result<u64, EventStoreError> {
        Ok(self.events.read().await.len() as u64)
    }
}

/// Append-only audit log, one JSON event per line.
#[derive(Debug)]
pub struct JsonlEventStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<UnifiedEvent>, EventStoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EventStoreError::QueryError(e.to_string())),
        };

        let mut events = Vec::new();
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UnifiedEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // A torn final line after a crash should not hide the rest.
                    tracing::warn!(path = %self.path.display(), line = line_no + 1, error = %e, "skipping unreadable audit record");
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn append(&self, event: &UnifiedEvent) -> Result<(), EventStoreError> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| EventStoreError::SerializationError(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| EventStoreError::AppendError(e.to_string()))?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| EventStoreError::AppendError(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| EventStoreError::AppendError(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| EventStoreError::AppendError(e.to_string()))
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<UnifiedEvent>, EventStoreError> {
        let events = self.read_all().await?;
        Ok(query.apply(events.iter()))
    }

    async fn count(&self) -> Result<u64, EventStoreError> {
        Ok(self.read_all().await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_bus::EventPayload;
    use crate::services::event_factory;

    fn make_test_event(seq: u64, severity: EventSeverity) -> UnifiedEvent {
        let mut event = event_factory::schedule_event(
            severity,
            None,
            EventPayload::ScheduleFired {
                schedule: format!("s{seq}"),
                task_id: None,
            },
        );
        event.sequence = SequenceNumber(seq);
        event
    }

    #[tokio::test]
    async fn test_in_memory_store_append_and_query() {
        let store = InMemoryEventStore::new();
        for i in 0..3 {
            store.append(&make_test_event(i, EventSeverity::Info)).await.unwrap();
        }

        let all = store.query(EventQuery::new()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].sequence.0, 2, "default order is newest first");

        let since = store
            .query(EventQuery::new().since_sequence(SequenceNumber(1)))
            .await
            .unwrap();
        assert_eq!(since.len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_store_pagination() {
        let store = InMemoryEventStore::new();
        for i in 0..10 {
            store.append(&make_test_event(i, EventSeverity::Info)).await.unwrap();
        }

        let page2 = store
            .query(EventQuery::new().limit(3).offset(3).ascending())
            .await
            .unwrap();
        assert_eq!(page2.len(), 3);
        assert_eq!(page2[0].sequence.0, 3);
    }

    #[tokio::test]
    async fn test_severity_filter() {
        let store = InMemoryEventStore::new();
        store.append(&make_test_event(0, EventSeverity::Debug)).await.unwrap();
        store.append(&make_test_event(1, EventSeverity::Warning)).await.unwrap();
        store.append(&make_test_event(2, EventSeverity::Error)).await.unwrap();

        let important = store
            .query(EventQuery::new().min_severity(EventSeverity::Warning))
            .await
            .unwrap();
        assert_eq!(important.len(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_store_round_trips_and_skips_torn_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let store = JsonlEventStore::new(&path);

        assert_eq!(store.count().await.unwrap(), 0);
        store.append(&make_test_event(0, EventSeverity::Info)).await.unwrap();
        store.append(&make_test_event(1, EventSeverity::Info)).await.unwrap();

        tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .unwrap()
            .write_all(b"{\"truncated\":")
            .await
            .unwrap();

        let events = store.query(EventQuery::new().ascending()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence.0, 1);
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
