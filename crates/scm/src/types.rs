//! Typed models for pull requests, checks, and merges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pull request under management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number (stable external identifier)
    pub number: u64,
    /// PR title
    pub title: String,
    /// Head commit SHA
    pub head_sha: String,
    /// Head branch name
    pub head_ref: String,
    /// Base branch name
    pub base_ref: String,
    /// Whether the PR is a draft
    pub draft: bool,
    /// Current label names
    pub labels: Vec<String>,
    /// When the PR was opened
    pub created_at: DateTime<Utc>,
    /// When the PR last changed
    pub updated_at: DateTime<Utc>,
    /// Number of changed files (detail fetch only; 0 in list responses)
    #[serde(default)]
    pub changed_files: u32,
    /// Lines added (detail fetch only)
    #[serde(default)]
    pub additions: u32,
    /// Lines deleted (detail fetch only)
    #[serde(default)]
    pub deletions: u32,
    /// PR URL
    pub html_url: String,
}

impl PullRequest {
    /// Check whether the PR carries a given label.
    #[must_use]
    pub fn has_label(&self, name: &str) -> bool {
        self.labels.iter().any(|l| l == name)
    }

    /// Seconds since the PR was opened, clamped to zero.
    #[must_use]
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }

    /// Total changed lines (additions + deletions).
    #[must_use]
    pub fn changed_lines(&self) -> u32 {
        self.additions + self.deletions
    }
}

/// A file changed by a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangedFile {
    /// File path
    pub filename: String,
    /// Change status (added, modified, removed, renamed)
    pub status: String,
    /// Lines added
    pub additions: u32,
    /// Lines deleted
    pub deletions: u32,
}

/// A check run attached to a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRun {
    /// Check name as configured on the platform
    pub name: String,
    /// Run status (queued, in_progress, completed)
    pub status: String,
    /// Conclusion once completed (success, failure, skipped, ...)
    pub conclusion: Option<String>,
}

impl CheckRun {
    /// Whether this check completed with a success conclusion.
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.status == "completed" && self.conclusion.as_deref() == Some("success")
    }

    /// Whether this check completed without success.
    #[must_use]
    pub fn is_red(&self) -> bool {
        self.status == "completed" && !self.is_green()
    }
}

/// Merge strategy, fixed by configuration rather than per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    /// Squash all commits into one
    Squash,
    /// Create a merge commit
    Merge,
    /// Rebase onto the base branch
    Rebase,
}

impl MergeMethod {
    /// Wire value expected by the platform merge API.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Squash => "squash",
            Self::Merge => "merge",
            Self::Rebase => "rebase",
        }
    }
}
