//! Working-tree file events backed by `notify`.

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::domain::errors::ChangeSourceError;
use crate::domain::models::{ChangeType, FileChange};
use crate::domain::ports::FileEventSource;

/// Watches directories under a repository root and streams what changes
/// in them as repository-relative [`FileChange`]s.
///
/// The watch lives as long as this struct; dropping it releases it.
pub struct NotifyFileWatcher {
    _watcher: RecommendedWatcher,
    events: Mutex<Option<mpsc::UnboundedReceiver<FileChange>>>,
}

impl NotifyFileWatcher {
    /// Start watching `watch_paths` (relative to `repo_path`) recursively.
    /// Paths that do not exist are skipped.
    pub fn start(
        repo_path: &Path,
        watch_paths: &[PathBuf],
        ignore_patterns: Vec<String>,
    ) -> Result<Self, ChangeSourceError> {
        let root = repo_path
            .canonicalize()
            .map_err(|e| ChangeSourceError::Watch(format!("{}: {e}", repo_path.display())))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let event_root = root.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                for change in file_changes(&event, &event_root, &ignore_patterns) {
                    let _ = tx.send(change);
                }
            }
            Err(e) => tracing::warn!(error = %e, "file watch error"),
        })
        .map_err(|e| ChangeSourceError::Watch(format!("Failed to create file watcher: {e}")))?;

        let mut watched = 0;
        for path in watch_paths {
            let target = root.join(path);
            if !target.exists() {
                tracing::warn!(path = %target.display(), "watch path does not exist; skipping");
                continue;
            }
            watcher
                .watch(&target, RecursiveMode::Recursive)
                .map_err(|e| ChangeSourceError::Watch(format!("Failed to watch {}: {e}", target.display())))?;
            watched += 1;
        }
        tracing::info!(root = %root.display(), watched, "file watcher started");

        Ok(Self {
            _watcher: watcher,
            events: Mutex::new(Some(rx)),
        })
    }
}

impl FileEventSource for NotifyFileWatcher {
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<FileChange>> {
        self.events.lock().ok()?.take()
    }
}

/// Translate a raw notify event into repository-relative changes. Events
/// under an ignored path component and metadata-only events are dropped.
pub fn file_changes(event: &Event, root: &Path, ignore_patterns: &[String]) -> Vec<FileChange> {
    event
        .paths
        .iter()
        .enumerate()
        .filter_map(|(index, path)| {
            let change = change_type(&event.kind, index)?;
            let relative = path.strip_prefix(root).unwrap_or(path);
            if is_ignored(relative, ignore_patterns) {
                return None;
            }
            Some(FileChange::new(relative.to_string_lossy().into_owned(), change))
        })
        .collect()
}

fn change_type(kind: &EventKind, index: usize) -> Option<ChangeType> {
    match kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeType::Added),
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(ChangeType::Deleted)
        }
        // Both carries [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(if index == 0 {
            ChangeType::Deleted
        } else {
            ChangeType::Added
        }),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeType::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => None,
    }
}

fn is_ignored(path: &Path, ignore_patterns: &[String]) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => ignore_patterns.iter().any(|pattern| name == pattern.as_str()),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::time::Duration;

    fn ignore() -> Vec<String> {
        vec![".git".to_string(), "target".to_string()]
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(Path::new("/repo").join(path)))
    }

    #[test]
    fn test_event_kinds_map_to_change_types() {
        let root = Path::new("/repo");
        let cases = [
            (EventKind::Create(CreateKind::File), ChangeType::Added),
            (EventKind::Modify(ModifyKind::Data(DataChange::Content)), ChangeType::Modified),
            (EventKind::Remove(RemoveKind::File), ChangeType::Deleted),
        ];
        for (kind, expected) in cases {
            let changes = file_changes(&event(kind, &["src/app.ts"]), root, &ignore());
            assert_eq!(changes, vec![FileChange::new("src/app.ts", expected)]);
        }

        let metadata = event(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)), &["src/app.ts"]);
        assert!(file_changes(&metadata, root, &ignore()).is_empty());
    }

    #[test]
    fn test_rename_is_a_delete_and_an_add() {
        let rename = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["src/old.ts", "src/new.ts"],
        );
        assert_eq!(
            file_changes(&rename, Path::new("/repo"), &ignore()),
            vec![
                FileChange::new("src/old.ts", ChangeType::Deleted),
                FileChange::new("src/new.ts", ChangeType::Added),
            ]
        );
    }

    #[test]
    fn test_ignored_components_are_dropped() {
        let changes = file_changes(
            &event(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["target/debug/build.rs", "src/target.rs", ".git/index"],
            ),
            Path::new("/repo"),
            &ignore(),
        );
        assert_eq!(changes, vec![FileChange::new("src/target.rs", ChangeType::Modified)]);
    }

    #[test]
    fn test_missing_repository_is_an_error() {
        let result = NotifyFileWatcher::start(Path::new("/nonexistent/repo"), &[PathBuf::from("src")], ignore());
        assert!(matches!(result, Err(ChangeSourceError::Watch(_))));
    }

    #[tokio::test]
    async fn test_streams_created_files_once_subscribed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let watcher = NotifyFileWatcher::start(dir.path(), &[PathBuf::from("src")], ignore()).unwrap();
        let mut events = watcher.subscribe().expect("first subscriber gets the stream");
        assert!(watcher.subscribe().is_none());

        std::fs::write(dir.path().join("src/new.ts"), "export {}").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let change = events.recv().await.expect("watcher alive");
                if change.change == ChangeType::Added {
                    return change;
                }
            }
        })
        .await
        .expect("file event arrives");
        assert_eq!(change.path, "src/new.ts");
    }
}
