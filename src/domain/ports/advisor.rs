//! Advisor port - external risk and timing analysis.

use async_trait::async_trait;

use crate::domain::errors::AdvisorError;
use crate::domain::models::{CadenceSuggestion, ChangeAssessment, CommitInfo, ScheduleExecution};

/// Consulted by the change watcher and the scheduler.
#[async_trait]
pub trait Advisor: Send + Sync {
    /// Assess the impact of a commit's changed files and metadata.
    async fn assess_change(&self, commit: &CommitInfo) -> Result<ChangeAssessment, AdvisorError>;

    /// Recommend a new cadence for a schedule given its recent history.
    async fn suggest_cadence(
        &self,
        schedule_name: &str,
        history: &[ScheduleExecution],
    ) -> Result<CadenceSuggestion, AdvisorError>;
}
