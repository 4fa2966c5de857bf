//! Shell command executor.
//!
//! Runs the configured command for a task kind through `sh -c`. The task id,
//! kind and JSON payload are exported as `CONDUCTOR_TASK_ID`,
//! `CONDUCTOR_TASK_KIND` and `CONDUCTOR_PAYLOAD`. A non-zero exit is a
//! failure. When stdout parses as the outcome JSON for the kind it is used
//! as-is; otherwise a plain success outcome is built around it.
//!
//! Kinds without a configured command are simulated.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::process::Command;

use crate::domain::errors::ExecutorError;
use crate::domain::models::{
    AnalysisOutcome, AnalysisPayload, ExecutorConfig, FixOutcome, FixPayload, ReportOutcome,
    ReportPayload, TaskKind, TestOutcome, TestPayload,
};
use crate::domain::ports::{ExecutionContext, TaskExecutor};

/// Longest stderr excerpt carried into a failure message.
const STDERR_EXCERPT: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, kind: TaskKind) -> Option<&str> {
        let command = match kind {
            TaskKind::Test => self.config.test_command.as_deref(),
            TaskKind::Analysis => self.config.analysis_command.as_deref(),
            TaskKind::Fix => self.config.fix_command.as_deref(),
            TaskKind::Report => self.config.report_command.as_deref(),
        };
        command.filter(|c| !c.trim().is_empty())
    }

    /// Run the command for `kind`, returning its stdout, or `None` when no
    /// command is configured.
    async fn run_command<P: Serialize>(
        &self,
        kind: TaskKind,
        payload: &P,
        ctx: &ExecutionContext,
    ) -> Result<Option<String>, ExecutorError> {
        ctx.checkpoint()?;
        let Some(command) = self.command_for(kind) else {
            tracing::debug!(task_id = %ctx.task_id, kind = kind.as_str(), "no command configured; simulating");
            return Ok(None);
        };

        let payload_json =
            serde_json::to_string(payload).map_err(|e| ExecutorError::Failed(format!("Failed to encode payload: {e}")))?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env("CONDUCTOR_TASK_ID", ctx.task_id.to_string())
            .env("CONDUCTOR_TASK_KIND", kind.as_str())
            .env("CONDUCTOR_PAYLOAD", payload_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(task_id = %ctx.task_id, worker = %ctx.worker, command, "spawning task command");
        let child = cmd
            .spawn()
            .map_err(|e| ExecutorError::Failed(format!("Failed to spawn '{command}': {e}")))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            () = ctx.cancel.cancelled() => {
                tracing::info!(task_id = %ctx.task_id, "task command killed on cancellation");
                return Err(ExecutorError::Cancelled);
            }
            output = child.wait_with_output() => output
                .map_err(|e| ExecutorError::Failed(format!("Failed to wait for '{command}': {e}")))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            return Err(ExecutorError::Failed(if excerpt.is_empty() {
                format!("{} command exited with status {code}", kind.as_str())
            } else {
                format!("{} command exited with status {code}: {excerpt}", kind.as_str())
            }));
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

/// Parse stdout as a structured outcome, if it is one.
fn parse_outcome<T: DeserializeOwned>(stdout: &str) -> Option<T> {
    let trimmed = stdout.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn last_line(stdout: &str) -> String {
    stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn run_test(&self, payload: &TestPayload, ctx: &ExecutionContext) -> Result<TestOutcome, ExecutorError> {
        let started = Instant::now();
        let stdout = self.run_command(TaskKind::Test, payload, ctx).await?;
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        Ok(match stdout {
            Some(out) => parse_outcome(&out).unwrap_or(TestOutcome {
                passed: 1,
                duration_ms: elapsed,
                ..TestOutcome::default()
            }),
            None => TestOutcome {
                passed: u32::try_from(payload.files.len().max(1)).unwrap_or(u32::MAX),
                duration_ms: elapsed,
                ..TestOutcome::default()
            },
        })
    }

    async fn run_analysis(
        &self,
        payload: &AnalysisPayload,
        ctx: &ExecutionContext,
    ) -> Result<AnalysisOutcome, ExecutorError> {
        let stdout = self.run_command(TaskKind::Analysis, payload, ctx).await?;
        Ok(match stdout {
            Some(out) => parse_outcome(&out).unwrap_or_else(|| AnalysisOutcome {
                summary: last_line(&out),
                ..AnalysisOutcome::default()
            }),
            None => AnalysisOutcome {
                summary: format!(
                    "simulated analysis of {} file(s){}",
                    payload.files.len(),
                    payload.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
                ),
                ..AnalysisOutcome::default()
            },
        })
    }

    async fn run_fix(&self, payload: &FixPayload, ctx: &ExecutionContext) -> Result<FixOutcome, ExecutorError> {
        let stdout = self.run_command(TaskKind::Fix, payload, ctx).await?;
        Ok(match stdout {
            Some(out) => parse_outcome(&out).unwrap_or_else(|| FixOutcome {
                applied: true,
                files_changed: payload.files.clone(),
                description: last_line(&out),
            }),
            None => FixOutcome {
                applied: false,
                files_changed: Vec::new(),
                description: "no fix command configured".to_string(),
            },
        })
    }

    async fn run_report(
        &self,
        payload: &ReportPayload,
        ctx: &ExecutionContext,
    ) -> Result<ReportOutcome, ExecutorError> {
        let stdout = self.run_command(TaskKind::Report, payload, ctx).await?;
        Ok(match stdout {
            Some(out) => parse_outcome(&out).unwrap_or_else(|| ReportOutcome {
                location: None,
                summary: last_line(&out),
            }),
            None => ReportOutcome {
                location: None,
                summary: format!("{} ({} sections)", payload.title, payload.sections.len()),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TaskPriority, WorkerId};
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), WorkerId(1), TaskPriority::Medium)
    }

    fn executor(test_command: &str) -> CommandExecutor {
        CommandExecutor::new(ExecutorConfig {
            test_command: Some(test_command.to_string()),
            ..ExecutorConfig::default()
        })
    }

    #[tokio::test]
    async fn test_simulated_when_unconfigured() {
        let executor = CommandExecutor::default();
        let outcome = executor
            .run_report(&ReportPayload::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.summary, "Test report (0 sections)");

        let fix = executor.run_fix(&FixPayload::default(), &ctx()).await.unwrap();
        assert!(!fix.applied);
    }

    #[tokio::test]
    async fn test_structured_stdout_is_parsed() {
        let executor = executor(r#"echo '{"passed": 4, "failed": 1, "failures": ["t::x"]}'"#);
        let outcome = executor.run_test(&TestPayload::default(), &ctx()).await.unwrap();
        assert_eq!(outcome.passed, 4);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.failures, vec!["t::x"]);
    }

    #[tokio::test]
    async fn test_environment_is_exported() {
        let executor = CommandExecutor::new(ExecutorConfig {
            analysis_command: Some(r#"echo "$CONDUCTOR_TASK_KIND""#.to_string()),
            ..ExecutorConfig::default()
        });
        let outcome = executor
            .run_analysis(&AnalysisPayload::default(), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.summary, "analysis");
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let executor = executor("echo boom >&2; exit 3");
        let err = executor.run_test(&TestPayload::default(), &ctx()).await.unwrap_err();
        match err {
            ExecutorError::Failed(msg) => {
                assert!(msg.contains("status 3"), "{msg}");
                assert!(msg.contains("boom"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_command() {
        let executor = executor("sleep 30");
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = executor.run_test(&TestPayload::default(), &ctx).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Cancelled));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
