//! Version-control change sources and working-tree file events.

pub mod fs_watch;
pub mod git;

pub use fs_watch::NotifyFileWatcher;
pub use git::GitChangeSource;
