//! `conductor queue <kind>`: run one task through an in-process orchestrator.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::views::task_detail;
use crate::cli::output::{create_spinner, output, CommandOutput, ProgressBarExt};
use crate::cli::service::start_in_process;
use crate::domain::models::{Config, Task, TaskKind, TaskPayload, TaskPriority, TaskStatus};

#[derive(Args, Debug)]
pub struct QueueArgs {
    /// Task kind: test, analysis, fix or report
    #[arg(value_parser = parse_kind)]
    pub kind: TaskKind,

    /// Priority: low, medium (normal), high or critical
    #[arg(short, long, default_value = "medium", value_parser = parse_priority)]
    pub priority: TaskPriority,

    /// Full payload as JSON; overrides --files, --tags and --suite
    #[arg(long)]
    pub payload: Option<String>,

    /// Files the task concerns (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub files: Vec<String>,

    /// Test tags (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Test suite name
    #[arg(long)]
    pub suite: Option<String>,

    /// Seconds to wait for the task to finish
    #[arg(long, default_value_t = 300)]
    pub timeout: u64,
}

fn parse_kind(s: &str) -> Result<TaskKind, String> {
    TaskKind::from_str(s).ok_or_else(|| format!("unknown task kind '{s}' (expected test, analysis, fix or report)"))
}

fn parse_priority(s: &str) -> Result<TaskPriority, String> {
    TaskPriority::from_str(s).ok_or_else(|| format!("unknown priority '{s}' (expected low, medium, high or critical)"))
}

/// Build the payload for `args.kind` from the flags or the `--payload` JSON.
pub fn build_payload(args: &QueueArgs) -> Result<TaskPayload> {
    if let Some(raw) = &args.payload {
        let payload = match args.kind {
            TaskKind::Test => TaskPayload::Test(serde_json::from_str(raw)?),
            TaskKind::Analysis => TaskPayload::Analysis(serde_json::from_str(raw)?),
            TaskKind::Fix => TaskPayload::Fix(serde_json::from_str(raw)?),
            TaskKind::Report => TaskPayload::Report(serde_json::from_str(raw)?),
        };
        return Ok(payload);
    }

    let mut payload = TaskPayload::default_for(args.kind);
    match &mut payload {
        TaskPayload::Test(test) => {
            test.files.clone_from(&args.files);
            test.tags.clone_from(&args.tags);
            test.suite.clone_from(&args.suite);
        }
        TaskPayload::Analysis(analysis) => analysis.files.clone_from(&args.files),
        TaskPayload::Fix(fix) => fix.files.clone_from(&args.files),
        TaskPayload::Report(_) => {}
    }
    Ok(payload)
}

#[derive(Debug, Serialize)]
pub struct QueueOutput {
    pub task: Task,
}

impl CommandOutput for QueueOutput {
    fn to_human(&self) -> String {
        task_detail(&self.task)
    }
}

pub async fn execute(args: QueueArgs, config: Config, json_mode: bool) -> Result<()> {
    let payload = build_payload(&args).context("Invalid --payload JSON")?;
    let timeout = Duration::from_secs(args.timeout);

    let orchestrator = start_in_process(config).await?;
    let spinner = create_spinner(format!("Running {} task...", args.kind), json_mode);

    let result = async {
        let task_id = orchestrator.submit(args.kind, args.priority, payload).await?;
        orchestrator
            .dispatcher()
            .wait_for_terminal(task_id, timeout)
            .await?
            .with_context(|| format!("Timed out after {}s waiting for task {task_id}", args.timeout))
    }
    .await;

    orchestrator.stop().await;

    let task = match result {
        Ok(task) => task,
        Err(e) => {
            spinner.finish_error("task did not finish");
            return Err(e);
        }
    };
    if task.status == TaskStatus::Completed {
        spinner.finish_success(format!("{} task completed", task.kind));
    } else {
        spinner.finish_error(format!("{} task {}", task.kind, task.status));
    }

    let status = task.status;
    let error = task.error.clone();
    output(&QueueOutput { task }, json_mode);

    if status != TaskStatus::Completed {
        bail!("Task {}: {}", status, error.unwrap_or_else(|| "no error message".to_string()));
    }
    Ok(())
}
