//! Workflow definitions registered at startup.

use serde_json::json;

use super::step_registry::{
    CHECK_CRITICAL_FAILURES, NOTIFY, RECORD, RUN_ANALYSIS, RUN_FIX, RUN_REPORT, RUN_TESTS,
};
use crate::domain::models::{
    HookDefinition, StepCondition, StepDefinition, StepKind, WorkflowDefinition, WorkflowTrigger,
};

pub const PRE_RELEASE_TESTING: &str = "pre-release-testing";
pub const AUTO_FIX_AND_PR: &str = "auto-fix-and-pr";
pub const CONTINUOUS_MONITORING: &str = "continuous-monitoring";
pub const POST_DEPLOYMENT: &str = "post-deployment";
pub const REGRESSION_DETECTION: &str = "regression-detection";

pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![
        pre_release_testing(),
        auto_fix_and_pr(),
        continuous_monitoring(),
        post_deployment(),
        regression_detection(),
    ]
}

fn analysis(name: &str, reason: &str) -> StepDefinition {
    StepDefinition::new(name, StepKind::Analysis, RUN_ANALYSIS)
        .with_params(json!({ "payload": { "reason": reason } }))
}

fn dashboard(name: &str) -> StepDefinition {
    StepDefinition::new(name, StepKind::Dashboard, RUN_REPORT)
        .with_params(json!({ "priority": "low", "payload": { "title": "Dashboard update" } }))
}

fn pre_release_testing() -> WorkflowDefinition {
    WorkflowDefinition::new(PRE_RELEASE_TESTING, WorkflowTrigger::Commit)
        .with_description("Comprehensive testing before a merge")
        .with_step(analysis("analyze-changes", "analyze-changes"))
        .with_step(analysis("predict-risks", "predict-risks"))
        .with_step(
            StepDefinition::new("run-high-priority-tests", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "priority": "high", "payload": { "tags": ["high-priority"] } })),
        )
        .with_step(
            StepDefinition::new("check-critical-failures", StepKind::Analysis, CHECK_CRITICAL_FAILURES)
                .with_params(json!({ "step": "run-high-priority-tests" }))
                .with_retries(0)
                .on_failure(HookDefinition::new(
                    NOTIFY,
                    json!({ "message": "critical test failures block this release" }),
                )),
        )
        .with_step(dashboard("update-dashboard"))
        .with_step(StepDefinition::new("store-results", StepKind::Other, RECORD))
        .with_step(
            StepDefinition::new("notify-results", StepKind::Notify, NOTIFY)
                .with_params(json!({ "message": "pre-release testing finished" })),
        )
}

fn auto_fix_and_pr() -> WorkflowDefinition {
    WorkflowDefinition::new(AUTO_FIX_AND_PR, WorkflowTrigger::Failure)
        .with_description("Fix a failure automatically and propose the change")
        .with_step(analysis("analyze-failure", "analyze-failure"))
        .with_step(
            StepDefinition::new("generate-fix", StepKind::Fix, RUN_FIX).with_params(json!({ "priority": "high" })),
        )
        .with_step(StepDefinition::new("apply-fix", StepKind::Fix, RECORD))
        .with_step(
            StepDefinition::new("verify-fix", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "priority": "high", "payload": { "tags": ["verify"] } })),
        )
        .with_step(
            StepDefinition::new("create-pr", StepKind::Pr, RECORD)
                .when(StepCondition::context_flag("verify-fix", "/flagged").negate()),
        )
        .with_step(dashboard("update-dashboard"))
}

fn continuous_monitoring() -> WorkflowDefinition {
    WorkflowDefinition::new(CONTINUOUS_MONITORING, WorkflowTrigger::Schedule)
        .with_description("Continuous health and performance monitoring")
        .with_step(
            StepDefinition::new("health-check", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "payload": { "suite": "health", "tags": ["health"] } })),
        )
        .with_step(analysis("performance-metrics", "performance-metrics"))
        .with_step(analysis("detect-anomalies", "detect-anomalies"))
        .with_step(
            StepDefinition::new("trigger-tests-if-needed", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "priority": "high", "payload": { "tags": ["targeted"] } }))
                .when(StepCondition::context_flag("detect-anomalies", "/flagged")),
        )
        .with_step(dashboard("update-dashboard"))
}

fn post_deployment() -> WorkflowDefinition {
    WorkflowDefinition::new(POST_DEPLOYMENT, WorkflowTrigger::Deployment)
        .with_description("Verification after a deployment")
        .with_step(
            StepDefinition::new("smoke-tests", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "priority": "critical", "payload": { "suite": "smoke", "tags": ["smoke"] } })),
        )
        .with_step(
            StepDefinition::new("integration-verification", StepKind::Test, RUN_TESTS)
                .with_params(json!({ "priority": "high", "payload": { "suite": "integration" } })),
        )
        .with_step(analysis("retrain-risk-model", "retrain-risk-model"))
        .with_step(dashboard("update-dashboard"))
}

fn regression_detection() -> WorkflowDefinition {
    WorkflowDefinition::new(REGRESSION_DETECTION, WorkflowTrigger::Failure)
        .with_description("Detect and report regressions")
        .with_step(analysis("compare-with-baseline", "compare-with-baseline"))
        .with_step(analysis("identify-regression", "identify-regression"))
        .with_step(
            analysis("bisect-commits", "bisect-commits")
                .when(StepCondition::context_flag("identify-regression", "/flagged")),
        )
        .with_step(
            StepDefinition::new("notify-team", StepKind::Notify, NOTIFY)
                .with_params(json!({ "message": "regression detection finished" })),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_valid_and_unique() {
        let workflows = builtin_workflows();
        assert_eq!(workflows.len(), 5);
        for workflow in &workflows {
            workflow.validate().unwrap();
        }

        let mut names: Vec<&str> = workflows.iter().map(|w| w.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_monitoring_anomaly_step_is_conditional() {
        let monitoring = continuous_monitoring();
        let step = monitoring
            .steps
            .iter()
            .find(|s| s.name == "trigger-tests-if-needed")
            .unwrap();
        assert!(step.condition.is_some());
    }
}
