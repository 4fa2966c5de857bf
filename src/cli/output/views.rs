//! Human renderings of tasks and workflow executions shared by commands.

use chrono::{DateTime, Utc};

use super::table::{list_table, render_list, status_style};
use super::{format_duration_ms, truncate};
use crate::domain::models::{Task, TaskSource, WorkflowExecution};

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn source_label(source: &TaskSource) -> String {
    match source {
        TaskSource::Direct => "direct".to_string(),
        TaskSource::Schedule(name) => format!("schedule:{name}"),
        TaskSource::ChangeWatcher(commit) => format!("commit:{}", truncate(commit, 8)),
        TaskSource::FileWatch(path) => format!("file:{}", truncate(path, 32)),
        TaskSource::Workflow(name) => format!("workflow:{name}"),
    }
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Table of tasks: id, kind, priority, status, source, duration, result.
pub fn task_list(tasks: &[Task]) -> String {
    let mut table = list_table(&["id", "kind", "priority", "status", "source", "duration", "result"]);
    for task in tasks {
        let result = match (&task.result, &task.error) {
            (_, Some(error)) => truncate(error, 40),
            (Some(outcome), None) => truncate(&outcome.summary(), 40),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            short_id(&task.id),
            task.kind.to_string(),
            task.priority.to_string(),
            status_style(task.status.as_str()).to_string(),
            source_label(&task.source),
            task.duration_ms().map_or_else(String::new, format_duration_ms),
            result,
        ]);
    }
    render_list("task", &table, tasks.len())
}

/// Full description of one task.
pub fn task_detail(task: &Task) -> String {
    let mut lines = vec![
        format!("Task: {}", task.id),
        format!("Kind: {}", task.kind),
        format!("Priority: {}", task.priority),
        format!("Status: {}", status_style(task.status.as_str())),
        format!("Source: {}", source_label(&task.source)),
        format!("Enqueued: {}", timestamp(Some(task.enqueued_at))),
        format!("Started: {}", timestamp(task.started_at)),
        format!("Completed: {}", timestamp(task.completed_at)),
    ];
    if let Some(ms) = task.duration_ms() {
        lines.push(format!("Duration: {}", format_duration_ms(ms)));
    }
    if let Some(outcome) = &task.result {
        lines.push(format!("Result: {}", outcome.summary()));
    }
    if let Some(error) = &task.error {
        lines.push(format!("Error: {error}"));
    }
    lines.join("\n")
}

/// Table of workflow executions.
pub fn execution_list(executions: &[WorkflowExecution]) -> String {
    let mut table = list_table(&["id", "workflow", "trigger", "status", "steps", "started", "duration"]);
    for execution in executions {
        let done = execution.steps.iter().filter(|s| s.status.is_terminal()).count();
        table.add_row(vec![
            short_id(&execution.id),
            execution.workflow.clone(),
            execution.trigger.to_string(),
            status_style(execution.status.as_str()).to_string(),
            format!("{done}/{}", execution.steps.len()),
            timestamp(Some(execution.started_at)),
            execution.duration_ms().map_or_else(String::new, format_duration_ms),
        ]);
    }
    render_list("workflow execution", &table, executions.len())
}

/// One execution with a line per step.
pub fn execution_detail(execution: &WorkflowExecution) -> String {
    let mut lines = vec![
        format!("Workflow: {} ({})", execution.workflow, execution.id),
        format!("Trigger: {}", execution.trigger),
        format!("Status: {}", status_style(execution.status.as_str())),
    ];
    if let Some(ms) = execution.duration_ms() {
        lines.push(format!("Duration: {}", format_duration_ms(ms)));
    }
    lines.push("Steps:".to_string());
    for step in &execution.steps {
        let status = if step.skipped { "skipped" } else { step.status.as_str() };
        let mut line = format!("  {:<20} {:<10}", step.name, status_style(status));
        if step.attempts > 1 {
            line.push_str(&format!(" after {} attempts", step.attempts));
        }
        if let Some(error) = &step.error {
            line.push_str(&format!(" {}", truncate(error, 60)));
        }
        lines.push(line);
    }
    if let Some(error) = &execution.error {
        lines.push(format!("Error: {error}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        StepDefinition, StepKind, TaskKind, TaskPayload, TaskPriority, WorkflowDefinition,
        WorkflowTrigger,
    };

    #[test]
    fn test_task_views() {
        let task = Task::new(TaskKind::Test, TaskPriority::High, TaskPayload::default_for(TaskKind::Test))
            .unwrap()
            .with_source(TaskSource::Schedule("nightly".into()));
        let list = console::strip_ansi_codes(&task_list(std::slice::from_ref(&task))).into_owned();
        assert!(list.contains("schedule:nightly"));
        assert!(list.contains("queued"));

        let detail = console::strip_ansi_codes(&task_detail(&task)).into_owned();
        assert!(detail.contains(&task.id.to_string()));
        assert!(detail.contains("Completed: -"));
    }

    #[test]
    fn test_execution_detail_lists_steps() {
        let definition = WorkflowDefinition::new("ci", WorkflowTrigger::Manual)
            .with_step(StepDefinition::new("run-tests", StepKind::Test, "run_tests"))
            .with_step(StepDefinition::new("notify", StepKind::Notify, "notify"));
        let execution = WorkflowExecution::new(&definition, WorkflowTrigger::Manual, serde_json::Value::Null);

        let detail = console::strip_ansi_codes(&execution_detail(&execution)).into_owned();
        assert!(detail.contains("Workflow: ci"));
        assert!(detail.contains("run-tests"));
        assert!(detail.contains("pending"));
        assert_eq!(execution_list(&[]), "No workflow executions found.");
    }
}
