//! Daemon lifecycle commands: `start`, `stop` and `status`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::signal::unix::{signal, SignalKind};

use crate::adapters::FileMergeGate;
use crate::cli::output::views::task_list;
use crate::cli::output::{create_spinner, output, CommandOutput, ProgressBarExt};
use crate::cli::service::{build_orchestrator, DaemonState, RuntimeOptions, StatusSnapshot};
use crate::domain::models::Config;
use crate::domain::ports::MergeGate;
use crate::services::{Orchestrator, OrchestratorStatus, ShutdownReport};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Seconds between status snapshots read by `status`, `metrics` and `history`
    #[arg(long, default_value_t = 5)]
    pub snapshot_interval: u64,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Seconds to wait for the orchestrator to drain and exit
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

#[derive(Debug, Serialize)]
pub struct StartOutput {
    pub pid: u32,
    pub report: ShutdownReport,
}

impl CommandOutput for StartOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Orchestrator (pid {}) stopped.", self.pid),
            format!("  Cancelled queued tasks: {}", self.report.cancelled_queued),
            format!("  Drained running tasks:  {}", self.report.drained),
        ];
        if !self.report.forced.is_empty() {
            lines.push(format!("  Force-cancelled:        {}", self.report.forced.len()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct StopOutput {
    pub pid: u32,
    pub stopped: bool,
}

impl CommandOutput for StopOutput {
    fn to_human(&self) -> String {
        format!("Stopped orchestrator (pid {}).", self.pid)
    }
}

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub daemon: Option<DaemonState>,
    pub snapshot_at: Option<chrono::DateTime<chrono::Utc>>,
    pub min_workers: usize,
    pub max_workers: usize,
    #[serde(flatten)]
    pub status: OrchestratorStatus,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let s = &self.status;
        let m = &s.metrics;
        let state = match &self.daemon {
            Some(daemon) => format!(
                "running (pid {}, since {})",
                daemon.pid,
                daemon.started_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => "not running".to_string(),
        };
        let mut lines = vec![
            format!("Orchestrator: {state}"),
            format!(
                "Workers:      {} active / {} pooled (bounds {}..{})",
                m.active_workers, m.pool_size, self.min_workers, self.max_workers
            ),
            format!("Queue:        {} queued, {} running", m.queued_tasks, m.running_tasks),
            format!(
                "Processed:    {} (completed {}, failed {}, cancelled {}), success rate {:.1}%",
                m.total_tasks_processed,
                m.completed,
                m.failed,
                m.cancelled,
                m.success_rate * 100.0
            ),
            format!(
                "Scheduler:    {}",
                if s.scheduler_running { "running" } else { "stopped" }
            ),
            format!(
                "Watcher:      {}",
                if s.watcher_enabled { "enabled" } else { "disabled" }
            ),
        ];
        match &s.merge_block {
            Some(block) => lines.push(format!(
                "Merge:        BLOCKED by {} ({}): {}",
                &block.commit[..block.commit.len().min(8)],
                block.severity.as_str(),
                block.reason
            )),
            None => lines.push("Merge:        open".to_string()),
        }
        if let Some(at) = self.snapshot_at {
            lines.push(format!("Snapshot:     {}", at.to_rfc3339()));
        }

        let active: Vec<_> = s.in_flight.iter().chain(s.queued.iter()).cloned().collect();
        if !active.is_empty() {
            lines.push(String::new());
            lines.push(task_list(&active));
        }
        lines.join("\n")
    }
}

pub async fn start(args: StartArgs, config: Config, config_path: Option<PathBuf>, json_mode: bool) -> Result<()> {
    let state_path = config.daemon_state_path();
    if let Some(existing) = DaemonState::read_live(&state_path)? {
        bail!("Orchestrator is already running (pid {})", existing.pid);
    }

    let snapshot_path = config.status_snapshot_path();
    let history_limit = config.pool.history_limit;
    let orchestrator = build_orchestrator(config, RuntimeOptions::daemon()).await?;
    orchestrator.start().await.context("Failed to start orchestrator")?;

    let daemon = DaemonState::current(config_path);
    daemon.write(&state_path)?;
    tracing::info!(pid = daemon.pid, state = %state_path.display(), "orchestrator running; send SIGINT or SIGTERM to stop");
    if !json_mode {
        println!("Orchestrator running (pid {}). Press Ctrl-C to stop.", daemon.pid);
    }

    let interval = Duration::from_secs(args.snapshot_interval.max(1));
    let outcome = run_until_signal(&orchestrator, &snapshot_path, interval, history_limit).await;

    let report = orchestrator.stop().await;
    if let Err(e) = StatusSnapshot::remove(&snapshot_path).await {
        tracing::warn!(error = %e, "failed to remove status snapshot");
    }
    DaemonState::remove(&state_path)?;

    output(&StartOutput { pid: daemon.pid, report }, json_mode);
    outcome
}

/// Write snapshots until a shutdown signal arrives. A dispatch loop failure is fatal.
async fn run_until_signal(
    orchestrator: &Orchestrator,
    snapshot_path: &Path,
    interval: Duration,
    history_limit: usize,
) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut ticker = tokio::time::interval(interval);
    let dispatch = orchestrator.join_dispatch_loop();
    tokio::pin!(dispatch);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                return Ok(());
            }
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, shutting down");
                return Ok(());
            }
            result = &mut dispatch => {
                return result.context("Dispatch loop failed");
            }
            _ = ticker.tick() => {
                let written = match StatusSnapshot::capture(orchestrator, history_limit).await {
                    Ok(snapshot) => snapshot.write(snapshot_path).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::warn!(error = %e, "failed to write status snapshot");
                }
            }
        }
    }
}

pub async fn stop(args: StopArgs, config: Config, json_mode: bool) -> Result<()> {
    let state_path = config.daemon_state_path();
    let Some(daemon) = DaemonState::read(&state_path)? else {
        bail!("Orchestrator is not running");
    };
    if !daemon.is_alive() {
        DaemonState::remove(&state_path)?;
        bail!("Orchestrator is not running (removed stale state for pid {})", daemon.pid);
    }

    daemon.terminate()?;
    let spinner = create_spinner(format!("Waiting for pid {} to drain...", daemon.pid), json_mode);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
    while state_path.exists() && daemon.is_alive() {
        if tokio::time::Instant::now() >= deadline {
            spinner.finish_error("timed out");
            bail!("Timed out after {}s waiting for pid {} to exit", args.timeout, daemon.pid);
        }
        tokio::time::sleep(STOP_POLL_INTERVAL).await;
    }
    spinner.finish_success("stopped");

    output(
        &StopOutput {
            pid: daemon.pid,
            stopped: true,
        },
        json_mode,
    );
    Ok(())
}

pub async fn status(config: Config, json_mode: bool) -> Result<()> {
    let (min_workers, max_workers) = (config.pool.min_workers, config.pool.max_workers);
    let out = match StatusSnapshot::read_live(&config).await? {
        Some((daemon, snapshot)) => StatusOutput {
            daemon: Some(daemon),
            snapshot_at: Some(snapshot.written_at),
            min_workers,
            max_workers,
            status: snapshot.status,
        },
        None => {
            let merge_block = match &config.watcher.merge_block_file {
                Some(path) => FileMergeGate::new(path).current().await?,
                None => None,
            };
            let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await?;
            let mut status = orchestrator.status().await?;
            status.merge_block = merge_block;
            StatusOutput {
                daemon: None,
                snapshot_at: None,
                min_workers,
                max_workers,
                status,
            }
        }
    };
    output(&out, json_mode);
    Ok(())
}
