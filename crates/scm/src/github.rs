//! GitHub REST implementation of [`ScmClient`].
//!
//! Talks to the GitHub API directly via `reqwest`: bearer-token auth, a
//! fixed request timeout, and rate-limit-aware error mapping. The base URL
//! is overridable so tests can point the client at a local mock server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, Client as HttpClient, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::error::ScmError;
use crate::types::{ChangedFile, CheckRun, MergeMethod, PullRequest};
use crate::ScmClient;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "mend-orchestrator/0.1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variable holding the API token.
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";

/// GitHub API client scoped to a single repository.
#[derive(Clone)]
pub struct GithubClient {
    http: HttpClient,
    base_url: String,
    token: String,
    owner: String,
    repo: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LabelBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RefBody {
    #[serde(rename = "ref")]
    name: String,
    #[serde(default)]
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullBody {
    number: u64,
    title: String,
    #[serde(default)]
    draft: bool,
    head: RefBody,
    base: RefBody,
    #[serde(default)]
    labels: Vec<LabelBody>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    changed_files: u32,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    html_url: String,
}

impl From<PullBody> for PullRequest {
    fn from(p: PullBody) -> Self {
        Self {
            number: p.number,
            title: p.title,
            head_sha: p.head.sha,
            head_ref: p.head.name,
            base_ref: p.base.name,
            draft: p.draft,
            labels: p.labels.into_iter().map(|l| l.name).collect(),
            created_at: p.created_at,
            updated_at: p.updated_at,
            changed_files: p.changed_files,
            additions: p.additions,
            deletions: p.deletions,
            html_url: p.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    body: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CheckRunsBody {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct IssueBody {
    html_url: String,
}

impl GithubClient {
    /// Create a client for `owner/repo` with an explicit token.
    pub fn new(token: String, owner: String, repo: String) -> Result<Self, ScmError> {
        let http = HttpClient::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token,
            owner,
            repo,
        })
    }

    /// Create a client reading the token from `GITHUB_TOKEN`.
    pub fn from_env(owner: String, repo: String) -> Result<Self, ScmError> {
        let token =
            std::env::var(ENV_GITHUB_TOKEN).map_err(|_| ScmError::AuthenticationFailed)?;
        Self::new(token, owner, repo)
    }

    /// Override the API base URL (wiremock tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// The `owner/repo` path this client is scoped to.
    #[must_use]
    pub fn repo_path(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.base_url, self.owner, self.repo, tail
        )
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response, ScmError> {
        let mut req = self
            .http
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .header(header::ACCEPT, "application/vnd.github+json");

        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ScmError::AuthenticationFailed);
        }

        if response.status() == StatusCode::FORBIDDEN {
            if let Some(reset_in) = rate_limit_reset(&response) {
                return Err(ScmError::RateLimitExceeded { reset_in });
            }
        }

        Ok(response)
    }

    async fn expect_success(response: Response) -> Result<Response, ScmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ApiErrorBody>()
            .await
            .map(|e| e.message)
            .unwrap_or_default();
        Err(ScmError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Extract the rate-limit reset delay from response headers, if exhausted.
fn rate_limit_reset(response: &Response) -> Option<Duration> {
    let remaining: i64 = response
        .headers()
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    if remaining > 0 {
        return None;
    }
    let reset: i64 = response
        .headers()
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .parse()
        .ok()?;
    let now = Utc::now().timestamp();
    #[allow(clippy::cast_sign_loss)]
    Some(Duration::from_secs((reset - now).max(0) as u64))
}

#[async_trait]
impl ScmClient for GithubClient {
    #[instrument(skip(self))]
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ScmError> {
        let url = self.url("pulls?state=open&per_page=100");
        let response = self.request(Method::GET, &url, None).await?;
        let pulls: Vec<PullBody> = Self::expect_success(response).await?.json().await?;

        debug!("Listed {} open pull requests", pulls.len());
        Ok(pulls.into_iter().map(PullRequest::from).collect())
    }

    #[instrument(skip(self), fields(pr = %number))]
    async fn get_pull(&self, number: u64) -> Result<PullRequest, ScmError> {
        let url = self.url(&format!("pulls/{number}"));
        let response = self.request(Method::GET, &url, None).await?;
        let pull: PullBody = Self::expect_success(response).await?.json().await?;
        Ok(pull.into())
    }

    #[instrument(skip(self), fields(pr = %number))]
    async fn list_changed_files(&self, number: u64) -> Result<Vec<ChangedFile>, ScmError> {
        let url = self.url(&format!("pulls/{number}/files?per_page=100"));
        let response = self.request(Method::GET, &url, None).await?;
        let files: Vec<ChangedFile> = Self::expect_success(response).await?.json().await?;
        Ok(files)
    }

    #[instrument(skip(self), fields(pr = %number, labels = ?labels))]
    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ScmError> {
        if labels.is_empty() {
            return Ok(());
        }
        let url = self.url(&format!("issues/{number}/labels"));
        let body = serde_json::json!({ "labels": labels });
        let response = self.request(Method::POST, &url, Some(body)).await?;
        Self::expect_success(response).await?;

        info!("Added {} labels to PR #{}", labels.len(), number);
        Ok(())
    }

    #[instrument(skip(self), fields(pr = %number, label = %label))]
    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ScmError> {
        let url = self.url(&format!("issues/{number}/labels/{label}"));
        let response = self.request(Method::DELETE, &url, None).await?;

        // 404 means the label is already gone, which is the desired state.
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Label '{}' already absent on PR #{}", label, number);
            return Ok(());
        }
        Self::expect_success(response).await?;
        Ok(())
    }

    #[instrument(skip(self, body), fields(pr = %number))]
    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ScmError> {
        let url = self.url(&format!("issues/{number}/comments"));
        let payload = serde_json::json!({ "body": body });
        let response = self.request(Method::POST, &url, Some(payload)).await?;
        Self::expect_success(response).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(pr = %number, prefix = %prefix))]
    async fn latest_marker(&self, number: u64, prefix: &str) -> Result<Option<String>, ScmError> {
        let url = self.url(&format!("issues/{number}/comments?per_page=100"));
        let response = self.request(Method::GET, &url, None).await?;
        let mut comments: Vec<CommentBody> =
            Self::expect_success(response).await?.json().await?;

        comments.sort_by_key(|c| c.created_at);
        Ok(comments
            .iter()
            .rev()
            .find_map(|c| extract_marker(&c.body, prefix)))
    }

    #[instrument(skip(self), fields(sha = %sha))]
    async fn check_runs(&self, sha: &str) -> Result<Vec<CheckRun>, ScmError> {
        let url = self.url(&format!("commits/{sha}/check-runs?per_page=100"));
        let response = self.request(Method::GET, &url, None).await?;
        let body: CheckRunsBody = Self::expect_success(response).await?.json().await?;
        Ok(body.check_runs)
    }

    #[instrument(skip(self), fields(pr = %number, method = %method.as_str()))]
    async fn merge_pull(&self, number: u64, method: MergeMethod) -> Result<(), ScmError> {
        let url = self.url(&format!("pulls/{number}/merge"));
        let body = serde_json::json!({ "merge_method": method.as_str() });
        let response = self.request(Method::PUT, &url, Some(body)).await?;

        let status = response.status();
        // 405/409: not mergeable right now (branch protection, conflict).
        if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::CONFLICT {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|e| e.message)
                .unwrap_or_default();
            return Err(ScmError::MergeRejected(message));
        }
        Self::expect_success(response).await?;

        info!("Merged PR #{}", number);
        Ok(())
    }

    #[instrument(skip(self, body), fields(title = %title))]
    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<String, ScmError> {
        let url = self.url("issues");
        let payload = serde_json::json!({ "title": title, "body": body, "labels": labels });
        let response = self.request(Method::POST, &url, Some(payload)).await?;
        let issue: IssueBody = Self::expect_success(response).await?.json().await?;

        info!(issue_url = %issue.html_url, "Created tracking issue");
        Ok(issue.html_url)
    }
}

/// Pull the payload out of a marker comment (`<!-- prefix payload -->`).
fn extract_marker(body: &str, prefix: &str) -> Option<String> {
    let opening = format!("<!-- {prefix} ");
    let start = body.find(&opening)? + opening.len();
    let end = body[start..].find(" -->")? + start;
    Some(body[start..end].to_string())
}
