//! Version-control change metadata and impact assessments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeType {
    /// Parse a `git diff-tree --name-status` code (`A`, `M`, `D`, `R100`, ...).
    pub fn from_git_status(code: &str) -> Option<Self> {
        match code.chars().next()? {
            'A' | 'C' => Some(Self::Added),
            'M' | 'T' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
        }
    }
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub change: ChangeType,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
}

impl FileChange {
    pub fn new(path: impl Into<String>, change: ChangeType) -> Self {
        Self {
            path: path.into(),
            change,
            additions: 0,
            deletions: 0,
        }
    }

    pub fn with_lines(mut self, additions: u32, deletions: u32) -> Self {
        self.additions = additions;
        self.deletions = deletions;
        self
    }
}

/// Commit metadata gathered by a change source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    #[serde(default)]
    pub branch: Option<String>,
    pub changes: Vec<FileChange>,
}

impl CommitInfo {
    pub fn short_hash(&self) -> &str {
        &self.hash[..self.hash.len().min(8)]
    }

    pub fn files(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.path.clone()).collect()
    }
}

/// Severity of an assessed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn to_priority(self) -> TaskPriority {
        match self {
            Self::Low => TaskPriority::Low,
            Self::Medium => TaskPriority::Medium,
            Self::High => TaskPriority::High,
            Self::Critical => TaskPriority::Critical,
        }
    }
}

/// Impact assessment returned by the advisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAssessment {
    pub severity: Severity,
    pub affected_components: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    pub recommended_checks: Vec<String>,
    pub block_merge: bool,
    #[serde(default)]
    pub estimated_test_secs: u64,
}

/// Marker recorded when a blocking check fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeBlock {
    pub commit: String,
    pub task_id: Uuid,
    pub severity: Severity,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}
