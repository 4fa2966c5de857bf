//! `conductor metrics`

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{format_duration_ms, output, CommandOutput};
use crate::cli::service::{build_orchestrator, RuntimeOptions, StatusSnapshot};
use crate::domain::models::{Config, OrchestratorMetrics};

#[derive(Debug, Serialize)]
pub struct MetricsOutput {
    pub source: &'static str,
    pub metrics: OrchestratorMetrics,
}

impl CommandOutput for MetricsOutput {
    fn to_human(&self) -> String {
        let m = &self.metrics;
        let last_run = m
            .last_run_time
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
        [
            format!("Metrics ({}):", self.source),
            format!("  Tasks processed:   {}", m.total_tasks_processed),
            format!("  Completed:         {}", m.completed),
            format!("  Failed:            {}", m.failed),
            format!("  Cancelled:         {}", m.cancelled),
            format!("  Success rate:      {:.1}%", m.success_rate * 100.0),
            format!("  Avg task duration: {}", format_duration_ms(m.avg_task_duration_ms)),
            format!("  Workers:           {} active / {} pooled", m.active_workers, m.pool_size),
            format!("  Queue:             {} queued, {} running", m.queued_tasks, m.running_tasks),
            format!("  Last run:          {last_run}"),
        ]
        .join("\n")
    }
}

pub async fn execute(config: Config, json_mode: bool) -> Result<()> {
    let out = match StatusSnapshot::read_live(&config).await? {
        Some((_, snapshot)) => MetricsOutput {
            source: "daemon",
            metrics: snapshot.status.metrics,
        },
        None => {
            let orchestrator = build_orchestrator(config, RuntimeOptions::in_process()).await?;
            MetricsOutput {
                source: "config",
                metrics: orchestrator.dispatcher().metrics().await,
            }
        }
    };
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_without_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state_dir = dir.path().to_path_buf();
        let orchestrator = build_orchestrator(config.clone(), RuntimeOptions::in_process()).await.unwrap();
        let metrics = orchestrator.dispatcher().metrics().await;
        assert_eq!(metrics.total_tasks_processed, 0);

        let human = MetricsOutput { source: "config", metrics }.to_human();
        assert!(human.contains("Tasks processed:   0"));
        assert!(human.contains("Last run:          never"));

        execute(config, true).await.unwrap();
    }
}
