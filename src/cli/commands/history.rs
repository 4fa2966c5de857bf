//! `conductor history`: recent workflow and task executions.
//!
//! Reads the running daemon's snapshot, falling back to the workflow
//! records in the JSONL audit log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use uuid::Uuid;

use crate::cli::output::views::{execution_list, task_list};
use crate::cli::output::{format_duration_ms, list_table, output, render_list, status_style, truncate, CommandOutput};
use crate::cli::service::StatusSnapshot;
use crate::domain::models::{Config, Task, WorkflowExecution};
use crate::services::{EventCategory, EventPayload, EventQuery, EventStore, JsonlEventStore};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of records per section
    #[arg(short, long, default_value_t = 20)]
    pub limit: usize,
}

/// A finished workflow as recorded in the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub execution_id: Uuid,
    pub workflow: String,
    pub status: &'static str,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryOutput {
    pub source: &'static str,
    pub workflows: Vec<WorkflowExecution>,
    pub tasks: Vec<Task>,
    pub audit: Vec<AuditRecord>,
}

impl HistoryOutput {
    fn is_empty(&self) -> bool {
        self.workflows.is_empty() && self.tasks.is_empty() && self.audit.is_empty()
    }
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        if self.is_empty() {
            return "No execution history available.".to_string();
        }
        if self.source == "audit" {
            let mut table = list_table(&["time", "execution", "workflow", "status", "duration", "error"]);
            for record in &self.audit {
                table.add_row(vec![
                    record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    record.execution_id.to_string()[..8].to_string(),
                    record.workflow.clone(),
                    status_style(record.status).to_string(),
                    record.duration_ms.map_or_else(String::new, format_duration_ms),
                    record.error.as_deref().map(|e| truncate(e, 50)).unwrap_or_default(),
                ]);
            }
            return render_list("workflow run", &table, self.audit.len());
        }
        format!("{}\n\n{}", execution_list(&self.workflows), task_list(&self.tasks))
    }
}

/// Finished workflow runs from the audit log, newest first.
pub async fn audit_records(store: &dyn EventStore, limit: usize) -> Result<Vec<AuditRecord>> {
    let events = store
        .query(EventQuery::new().category(EventCategory::Workflow).descending())
        .await
        .context("Failed to read the audit log")?;

    Ok(events
        .into_iter()
        .filter_map(|event| match event.payload {
            EventPayload::WorkflowCompleted {
                execution_id,
                workflow,
                duration_ms,
            } => Some(AuditRecord {
                timestamp: event.timestamp,
                execution_id,
                workflow,
                status: "completed",
                duration_ms,
                error: None,
            }),
            EventPayload::WorkflowFailed {
                execution_id,
                workflow,
                error,
            } => Some(AuditRecord {
                timestamp: event.timestamp,
                execution_id,
                workflow,
                status: "failed",
                duration_ms: None,
                error: Some(error),
            }),
            _ => None,
        })
        .take(limit)
        .collect())
}

pub async fn execute(args: HistoryArgs, config: Config, json_mode: bool) -> Result<()> {
    let out = match StatusSnapshot::read_live(&config).await? {
        Some((_, snapshot)) => HistoryOutput {
            source: "daemon",
            workflows: snapshot.workflow_history.into_iter().take(args.limit).collect(),
            tasks: snapshot.task_history.into_iter().take(args.limit).collect(),
            audit: Vec::new(),
        },
        None => {
            let store = JsonlEventStore::new(config.events_path());
            HistoryOutput {
                source: "audit",
                workflows: Vec::new(),
                tasks: Vec::new(),
                audit: audit_records(&store, args.limit).await?,
            }
        }
    };
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_factory;
    use crate::services::{EventSeverity, InMemoryEventStore};

    fn workflow_event(payload: EventPayload) -> crate::services::UnifiedEvent {
        event_factory::workflow_event(EventSeverity::Info, Uuid::new_v4(), payload)
    }

    #[tokio::test]
    async fn test_audit_records_keep_finished_runs() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        for payload in [
            EventPayload::WorkflowStarted {
                execution_id: id,
                workflow: "ci".into(),
                trigger: "manual".into(),
            },
            EventPayload::WorkflowCompleted {
                execution_id: id,
                workflow: "ci".into(),
                duration_ms: Some(1200),
            },
            EventPayload::WorkflowFailed {
                execution_id: Uuid::new_v4(),
                workflow: "nightly".into(),
                error: "step 'run-tests' failed".into(),
            },
        ] {
            store.append(&workflow_event(payload)).await.unwrap();
        }

        let records = audit_records(&store, 10).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].workflow, "nightly");
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[1].duration_ms, Some(1200));

        assert_eq!(audit_records(&store, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_empty_history_message() {
        let out = HistoryOutput {
            source: "audit",
            workflows: Vec::new(),
            tasks: Vec::new(),
            audit: Vec::new(),
        };
        assert_eq!(out.to_human(), "No execution history available.");
    }
}
