//! Results returned by executors, one shape per task kind.

use serde::{Deserialize, Serialize};

use super::task::TaskKind;

/// Result of a test run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestOutcome {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub failures: Vec<String>,
}

impl TestOutcome {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Result of an analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOutcome {
    pub summary: String,
    pub findings: Vec<String>,
    /// Risk estimate in `[0.0, 1.0]`.
    pub risk_score: f64,
}

/// Result of a fix attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixOutcome {
    pub applied: bool,
    pub files_changed: Vec<String>,
    pub description: String,
}

/// Result of report generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOutcome {
    pub location: Option<String>,
    pub summary: String,
}

/// Outcome of a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Test(TestOutcome),
    Analysis(AnalysisOutcome),
    Fix(FixOutcome),
    Report(ReportOutcome),
}

/// Analysis results at or above this risk are flagged for follow-up.
pub const RISK_FLAG_THRESHOLD: f64 = 0.5;

impl TaskOutcome {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Test(_) => TaskKind::Test,
            Self::Analysis(_) => TaskKind::Analysis,
            Self::Fix(_) => TaskKind::Fix,
            Self::Report(_) => TaskKind::Report,
        }
    }

    /// True when a test outcome reports failing tests.
    pub fn has_failures(&self) -> bool {
        matches!(self, Self::Test(t) if t.has_failures())
    }

    /// Whether the outcome calls for attention: failing tests, a risky
    /// analysis, or a fix that could not be applied.
    pub fn is_flagged(&self) -> bool {
        match self {
            Self::Test(t) => t.has_failures(),
            Self::Analysis(a) => a.risk_score >= RISK_FLAG_THRESHOLD,
            Self::Fix(f) => !f.applied,
            Self::Report(_) => false,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Test(t) => format!("{} passed, {} failed, {} skipped", t.passed, t.failed, t.skipped),
            Self::Analysis(a) => format!("risk {:.2}: {}", a.risk_score, a.summary),
            Self::Fix(f) if f.applied => format!("fix applied to {} file(s)", f.files_changed.len()),
            Self::Fix(_) => "fix not applied".to_string(),
            Self::Report(r) => r.summary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flagging_rules() {
        let failing = TaskOutcome::Test(TestOutcome {
            passed: 3,
            failed: 1,
            ..TestOutcome::default()
        });
        assert!(failing.has_failures());
        assert!(failing.is_flagged());

        let risky = TaskOutcome::Analysis(AnalysisOutcome {
            risk_score: 0.8,
            ..AnalysisOutcome::default()
        });
        assert!(!risky.has_failures());
        assert!(risky.is_flagged());

        let calm = TaskOutcome::Analysis(AnalysisOutcome {
            risk_score: 0.1,
            ..AnalysisOutcome::default()
        });
        assert!(!calm.is_flagged());

        assert!(TaskOutcome::Fix(FixOutcome::default()).is_flagged());
        assert!(!TaskOutcome::Report(ReportOutcome::default()).is_flagged());
    }

    #[test]
    fn test_outcome_tagged_json() {
        let outcome = TaskOutcome::Test(TestOutcome {
            passed: 10,
            ..TestOutcome::default()
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["kind"], "test");
        assert_eq!(value["passed"], 10);
        assert_eq!(outcome.summary(), "10 passed, 0 failed, 0 skipped");
    }
}
