//! Merge gate port - records merge-block markers.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::MergeBlock;

#[async_trait]
pub trait MergeGate: Send + Sync {
    async fn block(&self, block: &MergeBlock) -> DomainResult<()>;

    async fn current(&self) -> DomainResult<Option<MergeBlock>>;

    async fn clear(&self) -> DomainResult<()>;
}
