//! Change source port - where new commits come from.

use async_trait::async_trait;

use crate::domain::errors::ChangeSourceError;
use crate::domain::models::CommitInfo;

#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Current head revision, or `None` for an empty repository.
    async fn head(&self) -> Result<Option<String>, ChangeSourceError>;

    /// Metadata and changed files for a revision.
    async fn commit_info(&self, revision: &str) -> Result<CommitInfo, ChangeSourceError>;
}
