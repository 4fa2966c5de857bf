//! Merge-block marker storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::MergeBlock;
use crate::domain::ports::MergeGate;

/// Keeps the marker in memory only.
#[derive(Debug, Default)]
pub struct InMemoryMergeGate {
    block: RwLock<Option<MergeBlock>>,
}

impl InMemoryMergeGate {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MergeGate for InMemoryMergeGate {
    async fn block(&self, block: &MergeBlock) -> DomainResult<()> {
        *self.block.write().await = Some(block.clone());
        Ok(())
    }

    async fn current(&self) -> DomainResult<Option<MergeBlock>> {
        Ok(self.block.read().await.clone())
    }

    async fn clear(&self) -> DomainResult<()> {
        *self.block.write().await = None;
        Ok(())
    }
}

/// Writes the marker as a JSON file that hooks and CI can check for.
#[derive(Debug)]
pub struct FileMergeGate {
    path: PathBuf,
    cached: InMemoryMergeGate,
}

impl FileMergeGate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: InMemoryMergeGate::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MergeGate for FileMergeGate {
    async fn block(&self, block: &MergeBlock) -> DomainResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::Io(format!("{}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(block)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| DomainError::Io(format!("{}: {e}", self.path.display())))?;
        tracing::info!(path = %self.path.display(), commit = %block.commit, "merge-block marker written");
        self.cached.block(block).await
    }

    async fn current(&self) -> DomainResult<Option<MergeBlock>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => self.cached.current().await,
            Err(e) => Err(DomainError::Io(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn clear(&self) -> DomainResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DomainError::Io(format!("{}: {e}", self.path.display()))),
        }
        self.cached.clear().await
    }
}
