//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::daemon::{StartArgs, StopArgs};
use super::commands::history::HistoryArgs;
use super::commands::queue::QueueArgs;
use super::commands::schedule::ScheduleArgs;
use super::commands::workflow::WorkflowArgs;

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Conductor - test automation job orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .conductor/config.yaml)
    #[arg(short, long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator in the foreground until SIGINT/SIGTERM
    Start(StartArgs),

    /// Stop a running orchestrator
    Stop(StopArgs),

    /// Show orchestrator status
    Status,

    /// Queue one task and wait for its result
    Queue(QueueArgs),

    /// List registered workflows
    Workflows,

    /// Run a workflow by name
    Workflow(WorkflowArgs),

    /// List cron schedules
    Schedules,

    /// Trigger a schedule immediately
    Schedule(ScheduleArgs),

    /// Show dispatch metrics
    Metrics,

    /// Show recent workflow and task executions
    History(HistoryArgs),
}
