//! Workflow commands: `workflows` lists definitions, `workflow <name>` runs one.

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use crate::cli::output::views::execution_detail;
use crate::cli::output::{create_spinner, list_table, output, render_list, truncate, CommandOutput, ProgressBarExt};
use crate::cli::service::{build_orchestrator, start_in_process, RuntimeOptions};
use crate::domain::models::{Config, ExecutionStatus, WorkflowDefinition, WorkflowExecution, WorkflowTrigger};

#[derive(Args, Debug)]
pub struct WorkflowArgs {
    /// Workflow name (see `conductor workflows`)
    pub name: String,

    /// Trigger data as JSON, available to step conditions
    #[arg(short, long)]
    pub data: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub trigger: WorkflowTrigger,
    pub parallel: bool,
    pub steps: Vec<String>,
    pub description: String,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            trigger: definition.trigger,
            parallel: definition.parallel,
            steps: definition.steps.iter().map(|s| s.name.clone()).collect(),
            description: definition.description.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowListOutput {
    pub workflows: Vec<WorkflowSummary>,
}

impl CommandOutput for WorkflowListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["name", "trigger", "mode", "steps", "description"]);
        for wf in &self.workflows {
            table.add_row(vec![
                wf.name.clone(),
                wf.trigger.to_string(),
                if wf.parallel { "parallel" } else { "sequential" }.to_string(),
                wf.steps.len().to_string(),
                truncate(&wf.description, 50),
            ]);
        }
        render_list("workflow", &table, self.workflows.len())
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowRunOutput {
    pub execution: WorkflowExecution,
}

impl CommandOutput for WorkflowRunOutput {
    fn to_human(&self) -> String {
        execution_detail(&self.execution)
    }
}

pub async fn list(config: Config, json_mode: bool) -> Result<()> {
    let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await?;
    let definitions = orchestrator.engine().definitions().await;
    let out = WorkflowListOutput {
        workflows: definitions.iter().map(WorkflowSummary::from).collect(),
    };
    output(&out, json_mode);
    Ok(())
}

pub async fn execute(args: WorkflowArgs, config: Config, json_mode: bool) -> Result<()> {
    let data = match &args.data {
        Some(raw) => serde_json::from_str(raw).context("Invalid --data JSON")?,
        None => Value::Null,
    };

    let orchestrator = start_in_process(config).await?;
    let spinner = create_spinner(format!("Running workflow {}...", args.name), json_mode);
    let result = orchestrator
        .engine()
        .execute_workflow(&args.name, WorkflowTrigger::Manual, data)
        .await;
    orchestrator.stop().await;

    let execution = match result {
        Ok(execution) => execution,
        Err(e) => {
            spinner.finish_error(format!("workflow {} could not run", args.name));
            return Err(e.into());
        }
    };

    let failed = execution.status != ExecutionStatus::Completed;
    if failed {
        spinner.finish_error(format!("workflow {} failed", args.name));
    } else {
        spinner.finish_success(format!("workflow {} completed", args.name));
    }
    let error = execution.error.clone();
    output(&WorkflowRunOutput { execution }, json_mode);

    if failed {
        bail!(
            "Workflow '{}' failed: {}",
            args.name,
            error.unwrap_or_else(|| "no error message".to_string())
        );
    }
    Ok(())
}
