//! Unified hosting-platform abstraction for the mend orchestrator.
//!
//! The orchestrator treats the hosting platform as the system of record for
//! pull-request labels and checks. This crate exposes the small surface the
//! core needs behind the [`ScmClient`] trait, plus a GitHub REST
//! implementation ([`GithubClient`]).
//!
//! Listing and reading are assumed cheap and are not governed by the
//! orchestrator's rate-limit budgets; mutations map to governed tiers at the
//! dispatcher layer.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod github;
pub mod types;

pub use error::ScmError;
pub use github::GithubClient;
pub use types::{ChangedFile, CheckRun, MergeMethod, PullRequest};

use async_trait::async_trait;

/// Operations the orchestrator needs from the hosting platform.
///
/// Implementations must make label removal idempotent (removing an absent
/// label succeeds) so that relabeling is safe to retry.
#[async_trait]
pub trait ScmClient: Send + Sync {
    /// List open pull requests with their labels and timestamps.
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ScmError>;

    /// Fetch one pull request with changed-file and line counts populated.
    async fn get_pull(&self, number: u64) -> Result<PullRequest, ScmError>;

    /// List the files changed by a pull request.
    async fn list_changed_files(&self, number: u64) -> Result<Vec<ChangedFile>, ScmError>;

    /// Add labels to a pull request (no-op for labels already present).
    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ScmError>;

    /// Remove a label from a pull request; absent labels are not an error.
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ScmError>;

    /// Post a comment on a pull request.
    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ScmError>;

    /// Find the newest bot marker comment starting with `prefix` and return
    /// its payload (the text between the prefix and the closing marker).
    async fn latest_marker(&self, number: u64, prefix: &str) -> Result<Option<String>, ScmError>;

    /// Check runs for a commit SHA.
    async fn check_runs(&self, sha: &str) -> Result<Vec<CheckRun>, ScmError>;

    /// Merge a pull request with the given strategy.
    async fn merge_pull(&self, number: u64, method: MergeMethod) -> Result<(), ScmError>;

    /// Create a tracking issue and return its URL.
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<String, ScmError>;
}
