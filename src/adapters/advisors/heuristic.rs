//! Rule-based advisor used when no external analysis service is wired in.

use async_trait::async_trait;

use crate::domain::errors::AdvisorError;
use crate::domain::models::{
    CadenceSuggestion, ChangeAssessment, ChangeType, CommitInfo, FileChange, ScheduleExecution,
    Severity,
};
use crate::domain::ports::Advisor;

const CRITICAL_SCORE: u32 = 50;
const HIGH_SCORE: u32 = 25;
const MEDIUM_SCORE: u32 = 10;

const SERVICE_MARKERS: &[&str] = &["service", "backend", "api/", "server"];
const TEST_MARKERS: &[&str] = &["test", "spec"];

/// Cadence proposed for schedules that keep failing.
pub const SUGGESTED_CRON: &str = "0 * * * *";

/// Seconds of test time estimated per changed file at each severity.
const SECS_PER_FILE: [u64; 4] = [15, 30, 60, 120];

#[derive(Debug, Clone)]
pub struct HeuristicAdvisor {
    critical_paths: Vec<String>,
}

impl Default for HeuristicAdvisor {
    fn default() -> Self {
        Self::new(crate::domain::models::WatcherConfig::default().critical_paths)
    }
}

impl HeuristicAdvisor {
    pub fn new(critical_paths: Vec<String>) -> Self {
        Self { critical_paths }
    }

    fn is_critical(&self, path: &str) -> bool {
        self.critical_paths.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Risk points contributed by one changed file.
    pub fn score_file(&self, change: &FileChange) -> u32 {
        let lower = change.path.to_lowercase();
        let location = if self.is_critical(&change.path) {
            10
        } else if SERVICE_MARKERS.iter().any(|m| lower.contains(m)) {
            5
        } else if TEST_MARKERS.iter().any(|m| lower.contains(m)) {
            1
        } else {
            3
        };
        let kind = match change.change {
            ChangeType::Deleted => 5,
            ChangeType::Added => 2,
            ChangeType::Modified | ChangeType::Renamed => 1,
        };
        location + kind + (change.additions / 10).min(5)
    }

    pub fn score(&self, commit: &CommitInfo) -> u32 {
        commit.changes.iter().map(|c| self.score_file(c)).sum()
    }
}

fn severity_for(score: u32) -> Severity {
    if score >= CRITICAL_SCORE {
        Severity::Critical
    } else if score >= HIGH_SCORE {
        Severity::High
    } else if score >= MEDIUM_SCORE {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Component a path belongs to: the directory under `src/`, or the top-level directory.
fn component_of(path: &str) -> Option<String> {
    let mut parts = path.split('/').filter(|p| !p.is_empty());
    let first = parts.next()?;
    let component = if first == "src" { parts.next()? } else { first };
    // a bare file at the root has no component
    if component.contains('.') && !path.contains('/') {
        return None;
    }
    Some(component.trim_end_matches(".rs").to_string())
}

#[async_trait]
impl Advisor for HeuristicAdvisor {
    async fn assess_change(&self, commit: &CommitInfo) -> Result<ChangeAssessment, AdvisorError> {
        let score = self.score(commit);
        let severity = severity_for(score);

        let mut affected_components: Vec<String> = commit
            .changes
            .iter()
            .filter_map(|c| component_of(&c.path))
            .collect();
        affected_components.sort();
        affected_components.dedup();

        let mut risk_factors = Vec::new();
        for change in &commit.changes {
            if self.is_critical(&change.path) {
                risk_factors.push(format!("critical path changed: {}", change.path));
            }
            if change.change == ChangeType::Deleted {
                risk_factors.push(format!("file deleted: {}", change.path));
            }
        }

        let mut recommended_checks = vec!["unit".to_string()];
        if severity >= Severity::Medium {
            recommended_checks.push("integration".to_string());
        }
        if commit.changes.iter().any(|c| c.path.to_lowercase().contains("auth")) {
            recommended_checks.push("security".to_string());
        }
        if severity == Severity::Critical {
            recommended_checks.push("full-suite".to_string());
        }

        let per_file = SECS_PER_FILE[severity as usize];
        let files = u64::try_from(commit.changes.len().max(1)).unwrap_or(u64::MAX);

        tracing::debug!(commit = commit.short_hash(), score, severity = severity.as_str(), "change scored");
        Ok(ChangeAssessment {
            severity,
            affected_components,
            risk_factors,
            recommended_checks,
            block_merge: severity == Severity::Critical,
            estimated_test_secs: files.saturating_mul(per_file),
        })
    }

    async fn suggest_cadence(
        &self,
        schedule_name: &str,
        history: &[ScheduleExecution],
    ) -> Result<CadenceSuggestion, AdvisorError> {
        if history.is_empty() {
            return Err(AdvisorError::InvalidResponse(format!(
                "no executions recorded for '{schedule_name}'"
            )));
        }
        let successes = history.iter().filter(|e| e.status.is_success()).count();
        #[allow(clippy::cast_precision_loss)]
        let rate = successes as f64 / history.len() as f64;

        Ok(CadenceSuggestion {
            cron_expression: SUGGESTED_CRON.to_string(),
            reason: format!(
                "success rate {:.0}% over the last {} runs; run hourly to catch failures sooner",
                rate * 100.0,
                history.len()
            ),
        })
    }
}
