//! Git change source backed by the `git` CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::domain::errors::ChangeSourceError;
use crate::domain::models::{ChangeType, CommitInfo, FileChange};
use crate::domain::ports::ChangeSource;

const FIELD_SEPARATOR: char = '|';

#[derive(Debug, Clone)]
pub struct GitChangeSource {
    repo_path: PathBuf,
}

impl GitChangeSource {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn git(&self, args: &[&str]) -> Result<String, ChangeSourceError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ChangeSourceError::CommandFailed(format!("git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChangeSourceError::CommandFailed(format!(
                "git {}: {}",
                args.join(" "),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ChangeSource for GitChangeSource {
    async fn head(&self) -> Result<Option<String>, ChangeSourceError> {
        match self.git(&["rev-parse", "--verify", "--quiet", "HEAD"]).await {
            Ok(out) => {
                let head = out.trim();
                Ok((!head.is_empty()).then(|| head.to_string()))
            }
            // an unborn branch has no HEAD yet
            Err(ChangeSourceError::CommandFailed(msg)) if !msg.contains("not a git repository") => {
                tracing::debug!(error = %msg, "no HEAD yet");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn commit_info(&self, revision: &str) -> Result<CommitInfo, ChangeSourceError> {
        let header = self
            .git(&["show", "--no-patch", "--format=%H|%an|%ad|%s", revision])
            .await?;
        let name_status = self
            .git(&["diff-tree", "--no-commit-id", "--name-status", "-r", "--root", revision])
            .await?;
        let numstat = self
            .git(&["diff-tree", "--no-commit-id", "--numstat", "-r", "--root", revision])
            .await?;
        let branch = self
            .git(&["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .ok()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty() && b != "HEAD");

        let mut commit = parse_header(&header)?;
        commit.branch = branch;
        commit.changes = merge_changes(parse_name_status(&name_status), &parse_numstat(&numstat));
        Ok(commit)
    }
}

/// Parse `%H|%an|%ad|%s`. The subject may itself contain separators.
pub fn parse_header(output: &str) -> Result<CommitInfo, ChangeSourceError> {
    let line = output
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| ChangeSourceError::Parse("empty commit header".to_string()))?;
    let mut fields = line.splitn(4, FIELD_SEPARATOR);
    let (Some(hash), Some(author), Some(date), Some(message)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(ChangeSourceError::Parse(format!("malformed commit header: {line}")));
    };

    Ok(CommitInfo {
        hash: hash.trim().to_string(),
        author: author.to_string(),
        date: date.to_string(),
        message: message.to_string(),
        branch: None,
        changes: Vec::new(),
    })
}

/// Parse `--name-status` lines. Renames report their new path.
pub fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let change = ChangeType::from_git_status(parts.next()?)?;
            let path = parts.last()?;
            Some(FileChange::new(path, change))
        })
        .collect()
}

/// Parse `--numstat` lines into `path -> (additions, deletions)`. Binary files count as zero.
pub fn parse_numstat(output: &str) -> HashMap<String, (u32, u32)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let additions = parts.next()?.parse().unwrap_or(0);
            let deletions = parts.next()?.parse().unwrap_or(0);
            let path = parts.next()?;
            // renames are printed as "old => new"
            let path = path.rsplit(" => ").next().unwrap_or(path).trim_end_matches('}');
            Some((path.to_string(), (additions, deletions)))
        })
        .collect()
}

fn merge_changes(changes: Vec<FileChange>, lines: &HashMap<String, (u32, u32)>) -> Vec<FileChange> {
    changes
        .into_iter()
        .map(|change| match lines.get(&change.path) {
            Some(&(additions, deletions)) => change.with_lines(additions, deletions),
            None => change,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_keeps_separators_in_subject() {
        let commit = parse_header("abc123|Ada|Mon Jan 1 2024|fix: a|b split\n").unwrap();
        assert_eq!(commit.hash, "abc123");
        assert_eq!(commit.author, "Ada");
        assert_eq!(commit.message, "fix: a|b split");
        assert!(parse_header("abc123|Ada").is_err());
        assert!(parse_header("").is_err());
    }

    #[test]
    fn test_parse_name_status_and_numstat() {
        let changes = parse_name_status("M\tsrc/lib.rs\nD\tsrc/old.rs\nR087\tsrc/a.rs\tsrc/b.rs\nX\tweird\n");
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1], FileChange::new("src/old.rs", ChangeType::Deleted));
        assert_eq!(changes[2].path, "src/b.rs");
        assert_eq!(changes[2].change, ChangeType::Renamed);

        let lines = parse_numstat("12\t3\tsrc/lib.rs\n-\t-\tassets/logo.png\n0\t40\tsrc/old.rs\n");
        assert_eq!(lines["src/lib.rs"], (12, 3));
        assert_eq!(lines["assets/logo.png"], (0, 0));

        let merged = merge_changes(changes, &lines);
        assert_eq!(merged[0].additions, 12);
        assert_eq!(merged[1].deletions, 40);
    }
}
