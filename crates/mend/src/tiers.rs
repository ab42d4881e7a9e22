//! Review and repair capability seams.
//!
//! The orchestrator never runs analysis or generates patches itself; it
//! calls out to the review and repair capabilities over HTTP and observes
//! their results through labels and checks on later runs. Both capabilities
//! sit behind traits so tests can substitute in-process fakes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use scm::PullRequest;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a tier backend call. All of these are transient from the
/// orchestrator's point of view: the change request is retried on a later
/// run, never synchronously.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}")]
    Rejected { status: u16 },
}

/// Result of a repair submission within the bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The capability committed a fix upstream; re-review is required
    Applied,
    /// The capability gave up
    Failed(String),
}

/// Requests a (re-)review for a head commit.
#[async_trait]
pub trait ReviewBackend: Send + Sync {
    async fn request_review(&self, pull: &PullRequest) -> Result<(), TierError>;
}

/// Submits defects for automated repair.
#[async_trait]
pub trait RepairBackend: Send + Sync {
    async fn submit(&self, pull: &PullRequest, defects: &[String])
        -> Result<RepairOutcome, TierError>;
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    repository: &'a str,
    number: u64,
    head_sha: &'a str,
}

#[derive(Debug, Serialize)]
struct RepairRequest<'a> {
    repository: &'a str,
    number: u64,
    head_sha: &'a str,
    defects: &'a [String],
    changed_files: u32,
    changed_lines: u32,
}

#[derive(Debug, Deserialize)]
struct RepairResponse {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

/// HTTP implementation of the review capability.
pub struct HttpReviewBackend {
    client: HttpClient,
    url: String,
    repository: String,
}

impl HttpReviewBackend {
    /// Create a backend posting to `url`.
    pub fn new(url: String, repository: String, timeout: Duration) -> Result<Self, TierError> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            repository,
        })
    }
}

#[async_trait]
impl ReviewBackend for HttpReviewBackend {
    async fn request_review(&self, pull: &PullRequest) -> Result<(), TierError> {
        let body = ReviewRequest {
            repository: &self.repository,
            number: pull.number,
            head_sha: &pull.head_sha,
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TierError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(pr = pull.number, sha = %pull.head_sha, "Review requested");
        Ok(())
    }
}

/// HTTP implementation of the repair capability.
pub struct HttpRepairBackend {
    client: HttpClient,
    url: String,
    repository: String,
}

impl HttpRepairBackend {
    /// Create a backend posting to `url`.
    pub fn new(url: String, repository: String, timeout: Duration) -> Result<Self, TierError> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            repository,
        })
    }
}

#[async_trait]
impl RepairBackend for HttpRepairBackend {
    async fn submit(
        &self,
        pull: &PullRequest,
        defects: &[String],
    ) -> Result<RepairOutcome, TierError> {
        let body = RepairRequest {
            repository: &self.repository,
            number: pull.number,
            head_sha: &pull.head_sha,
            defects,
            changed_files: pull.changed_files,
            changed_lines: pull.changed_lines(),
        };

        debug!(pr = pull.number, defects = defects.len(), "Submitting repair");
        let response = self.client.post(&self.url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TierError::Rejected {
                status: status.as_u16(),
            });
        }

        let parsed: RepairResponse = response.json().await?;
        if parsed.status == "applied" {
            info!(pr = pull.number, "Repair applied upstream");
            Ok(RepairOutcome::Applied)
        } else {
            let detail = parsed.detail.unwrap_or_else(|| parsed.status.clone());
            Ok(RepairOutcome::Failed(detail))
        }
    }
}
