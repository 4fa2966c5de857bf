//! File event port - working-tree changes as they happen.

use tokio::sync::mpsc;

use crate::domain::models::FileChange;

pub trait FileEventSource: Send + Sync {
    /// Take the event stream. Only the first call gets it.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<FileChange>>;
}
