//! Schedule commands: `schedules` lists cron schedules, `schedule <name>`
//! fires one immediately.

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{
    create_spinner, format_duration_ms, list_table, output, render_list, status_style, CommandOutput,
    ProgressBarExt,
};
use crate::cli::service::{build_orchestrator, start_in_process, RuntimeOptions, StatusSnapshot};
use crate::domain::models::{CadenceSuggestion, Config, ScheduleExecution};
use crate::services::ScheduleView;

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    /// Schedule name (see `conductor schedules`)
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ScheduleListOutput {
    /// `daemon` when read from a running orchestrator, `config` otherwise.
    pub source: &'static str,
    pub schedules: Vec<ScheduleView>,
}

impl CommandOutput for ScheduleListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["name", "cron", "kind", "priority", "enabled", "next", "runs", "success"]);
        for view in &self.schedules {
            let entry = &view.entry;
            table.add_row(vec![
                entry.name.clone(),
                entry.cron.clone(),
                entry.kind.to_string(),
                entry.priority.to_string(),
                if entry.enabled { "yes" } else { "no" }.to_string(),
                view.next_fire
                    .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string()),
                view.stats.total_executions.to_string(),
                view.stats
                    .success_rate
                    .map_or_else(|| "-".to_string(), |r| format!("{:.0}%", r * 100.0)),
            ]);
        }
        render_list("schedule", &table, self.schedules.len())
    }
}

#[derive(Debug, Serialize)]
pub struct ScheduleRunOutput {
    pub execution: ScheduleExecution,
    pub suggestion: Option<CadenceSuggestion>,
}

impl CommandOutput for ScheduleRunOutput {
    fn to_human(&self) -> String {
        let e = &self.execution;
        let mut lines = vec![
            format!("Schedule: {}", e.schedule),
            format!("Status: {}", status_style(e.status.as_str())),
        ];
        if let Some(task_id) = e.task_id {
            lines.push(format!("Task: {task_id}"));
        }
        if let Some(ms) = e.duration_ms() {
            lines.push(format!("Duration: {}", format_duration_ms(ms)));
        }
        if let Some(error) = &e.error {
            lines.push(format!("Error: {error}"));
        }
        if let Some(suggestion) = &self.suggestion {
            lines.push(format!(
                "Suggested cadence: {} ({})",
                suggestion.cron_expression, suggestion.reason
            ));
        }
        lines.join("\n")
    }
}

pub async fn list(config: Config, json_mode: bool) -> Result<()> {
    let out = match StatusSnapshot::read_live(&config).await? {
        Some((_, snapshot)) => ScheduleListOutput {
            source: "daemon",
            schedules: snapshot.schedules,
        },
        None => {
            let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await?;
            ScheduleListOutput {
                source: "config",
                schedules: orchestrator.scheduler().list().await,
            }
        }
    };
    output(&out, json_mode);
    Ok(())
}

pub async fn execute(args: ScheduleArgs, config: Config, json_mode: bool) -> Result<()> {
    let orchestrator = start_in_process(config).await?;
    let spinner = create_spinner(format!("Running schedule {}...", args.name), json_mode);
    let result = orchestrator.scheduler().trigger_now(&args.name).await;
    let suggestion = match &result {
        Ok(_) => orchestrator.scheduler().evaluate_cadence(&args.name).await,
        Err(_) => None,
    };
    orchestrator.stop().await;

    let execution = match result {
        Ok(execution) => execution,
        Err(e) => {
            spinner.finish_error(format!("schedule {} could not run", args.name));
            return Err(e.into());
        }
    };
    let succeeded = execution.status.is_success();
    if succeeded {
        spinner.finish_success(format!("schedule {} completed", args.name));
    } else {
        spinner.finish_error(format!("schedule {} {}", args.name, execution.status.as_str()));
    }

    let status = execution.status;
    let error = execution.error.clone();
    output(&ScheduleRunOutput { execution, suggestion }, json_mode);

    if !succeeded {
        bail!(
            "Schedule '{}' {}: {}",
            args.name,
            status.as_str(),
            error.unwrap_or_else(|| "no error message".to_string())
        );
    }
    Ok(())
}
