//! Whole-orchestrator flows: lifecycle-driven workflows, follow-up fixes,
//! manual workflow runs and start/stop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fast_config, wait_until};
use conductor::adapters::{HeuristicAdvisor, MockExecutor};
use conductor::domain::models::{
    Config, ExecutionStatus, TaskKind, TaskPayload, TaskPriority, TaskSource, TaskStatus,
    WorkflowTrigger,
};
use conductor::services::builtin_workflows::{AUTO_FIX_AND_PR, CONTINUOUS_MONITORING, POST_DEPLOYMENT};
use conductor::services::workflow_engine::FOLLOWUP_SOURCE;
use conductor::services::{EventBus, Orchestrator};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

async fn orchestrator(config: Config, executor: MockExecutor) -> Orchestrator {
    Orchestrator::new(
        config,
        Arc::new(executor),
        Arc::new(HeuristicAdvisor::default()),
        Arc::new(EventBus::default()),
    )
    .await
    .unwrap()
}

async fn wait_for_execution(orch: &Orchestrator, workflow: &str) -> bool {
    wait_until(Duration::from_secs(5), move || async move {
        orch.engine()
            .execution_history(50)
            .await
            .iter()
            .any(|e| e.workflow == workflow && e.status != ExecutionStatus::Running)
    })
    .await
}

#[tokio::test]
async fn test_completed_test_triggers_monitoring_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(fast_config(dir.path()), MockExecutor::new()).await;
    orch.start().await.unwrap();

    let id = orch
        .submit(TaskKind::Test, TaskPriority::Medium, TaskPayload::default_for(TaskKind::Test))
        .await
        .unwrap();
    let task = orch
        .dispatcher()
        .wait_for_terminal(id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    assert!(wait_for_execution(&orch, CONTINUOUS_MONITORING).await);
    let execution = orch
        .engine()
        .execution_history(10)
        .await
        .into_iter()
        .find(|e| e.workflow == CONTINUOUS_MONITORING)
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.trigger, WorkflowTrigger::Schedule);
    // nothing was flagged, so the targeted re-run is skipped
    let targeted = execution
        .steps
        .iter()
        .find(|s| s.name == "trigger-tests-if-needed")
        .unwrap();
    assert!(targeted.skipped);

    orch.stop().await;
}

#[tokio::test]
async fn test_critical_failure_creates_followup_and_fix_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let executor = MockExecutor::new().with_script(TaskKind::Test, [Err("segfault in auth".to_string())]);
    let orch = orchestrator(fast_config(dir.path()), executor.clone()).await;
    orch.start().await.unwrap();

    let id = orch
        .submit(TaskKind::Test, TaskPriority::Critical, TaskPayload::default_for(TaskKind::Test))
        .await
        .unwrap();
    let task = orch
        .dispatcher()
        .wait_for_terminal(id, Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    assert!(wait_for_execution(&orch, AUTO_FIX_AND_PR).await);
    let followup_source = &TaskSource::Workflow(FOLLOWUP_SOURCE.to_string());
    let dispatcher = orch.dispatcher();
    assert!(
        wait_until(Duration::from_secs(5), move || async move {
            dispatcher
                .history(100)
                .await
                .iter()
                .any(|t| t.kind == TaskKind::Fix && &t.source == followup_source && t.is_terminal())
        })
        .await,
        "follow-up fix task never finished"
    );
    let followup = dispatcher
        .history(100)
        .await
        .into_iter()
        .find(|t| &t.source == followup_source)
        .unwrap();
    assert_eq!(followup.priority, TaskPriority::High);
    match &followup.payload {
        TaskPayload::Fix(fix) => {
            assert_eq!(fix.task_id, Some(id));
            assert_eq!(fix.error.as_deref(), task.error.as_deref());
        }
        other => panic!("unexpected payload {other:?}"),
    }

    orch.stop().await;
}

#[tokio::test]
async fn test_workflow_tasks_do_not_retrigger_workflows() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(fast_config(dir.path()), MockExecutor::new()).await;
    orch.start().await.unwrap();

    let execution = orch
        .engine()
        .execute_workflow(POST_DEPLOYMENT, WorkflowTrigger::Manual, json!({}))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed, "{:?}", execution.error);
    assert_eq!(execution.steps.len(), 4);
    assert!(execution.steps.iter().all(|s| !s.skipped && s.attempts >= 1));

    // every step task came from the workflow; give the listener a moment
    tokio::time::sleep(Duration::from_millis(200)).await;
    let history = orch.engine().execution_history(50).await;
    assert_eq!(history.len(), 1, "workflow tasks triggered extra runs");

    orch.stop().await;
}

#[tokio::test]
async fn test_start_stop_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(fast_config(dir.path()), MockExecutor::new()).await;
    assert!(!orch.is_started());

    assert_ok!(orch.start().await);
    assert!(orch.is_started());
    assert_err!(orch.start().await, "double start");

    let status = orch.status().await.unwrap();
    assert!(status.running);
    assert!(status.accepting);
    assert!(!status.scheduler_running);
    assert!(!status.watcher_enabled);
    assert!(status.merge_block.is_none());

    let report = orch.stop().await;
    assert_eq!(report.cancelled_queued, 0);
    assert!(report.forced.is_empty());
    assert!(!orch.is_started());

    let status = orch.status().await.unwrap();
    assert!(!status.accepting);
    assert!(orch
        .submit(TaskKind::Test, TaskPriority::Low, TaskPayload::default_for(TaskKind::Test))
        .await
        .is_err());
    assert_err!(orch.start().await, "restart after stop");
}
