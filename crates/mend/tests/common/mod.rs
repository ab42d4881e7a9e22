//! Shared fakes for the pipeline integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scm::{ChangedFile, CheckRun, MergeMethod, PullRequest, ScmClient, ScmError};

use mend::tiers::{RepairBackend, RepairOutcome, ReviewBackend, TierError};

pub fn pull(number: u64, labels: &[&str]) -> PullRequest {
    pull_at(number, labels, Utc::now())
}

pub fn pull_at(number: u64, labels: &[&str], created_at: DateTime<Utc>) -> PullRequest {
    PullRequest {
        number,
        title: format!("change {number}"),
        head_sha: format!("sha-{number}"),
        head_ref: format!("branch-{number}"),
        base_ref: "main".to_string(),
        draft: false,
        labels: labels.iter().map(ToString::to_string).collect(),
        created_at,
        updated_at: created_at,
        changed_files: 2,
        additions: 30,
        deletions: 10,
        html_url: format!("https://example.test/pull/{number}"),
    }
}

pub fn green_check(name: &str) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        status: "completed".to_string(),
        conclusion: Some("success".to_string()),
    }
}

pub fn red_check(name: &str) -> CheckRun {
    CheckRun {
        name: name.to_string(),
        status: "completed".to_string(),
        conclusion: Some("failure".to_string()),
    }
}

pub fn changed_file(filename: &str) -> ChangedFile {
    ChangedFile {
        filename: filename.to_string(),
        status: "modified".to_string(),
        additions: 10,
        deletions: 2,
    }
}

#[derive(Default)]
struct ScmState {
    pulls: HashMap<u64, PullRequest>,
    comments: HashMap<u64, Vec<String>>,
    checks: HashMap<String, Vec<CheckRun>>,
    files: HashMap<u64, Vec<ChangedFile>>,
    merged: Vec<u64>,
    issues: Vec<(String, String)>,
    merge_rejection: Option<String>,
}

/// In-memory platform double. Labels and comments mutate live so a test
/// can assert on the state the orchestrator leaves behind.
#[derive(Default)]
pub struct InMemoryScm {
    state: Mutex<ScmState>,
}

impl InMemoryScm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScmState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_pull(&self, pull: PullRequest) {
        let mut state = self.lock();
        state.checks.entry(pull.head_sha.clone()).or_default();
        state.files.entry(pull.number).or_default();
        state.pulls.insert(pull.number, pull);
    }

    pub fn set_checks(&self, sha: &str, checks: Vec<CheckRun>) {
        self.lock().checks.insert(sha.to_string(), checks);
    }

    pub fn set_files(&self, number: u64, files: Vec<ChangedFile>) {
        self.lock().files.insert(number, files);
    }

    pub fn reject_merges(&self, reason: &str) {
        self.lock().merge_rejection = Some(reason.to_string());
    }

    pub fn labels(&self, number: u64) -> Vec<String> {
        self.lock()
            .pulls
            .get(&number)
            .map(|p| p.labels.clone())
            .unwrap_or_default()
    }

    pub fn comments(&self, number: u64) -> Vec<String> {
        self.lock()
            .comments
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }

    pub fn merged(&self) -> Vec<u64> {
        self.lock().merged.clone()
    }

    pub fn issues(&self) -> Vec<(String, String)> {
        self.lock().issues.clone()
    }

    /// Snapshot of a pull's current state, for re-dispatch in tests.
    pub fn pull(&self, number: u64) -> PullRequest {
        self.lock().pulls[&number].clone()
    }
}

#[async_trait]
impl ScmClient for InMemoryScm {
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, ScmError> {
        let state = self.lock();
        let mut pulls: Vec<PullRequest> = state
            .pulls
            .values()
            .filter(|p| !state.merged.contains(&p.number))
            .cloned()
            .collect();
        pulls.sort_by_key(|p| p.number);
        Ok(pulls)
    }

    async fn get_pull(&self, number: u64) -> Result<PullRequest, ScmError> {
        self.lock().pulls.get(&number).cloned().ok_or(ScmError::Api {
            status: 404,
            message: format!("pull {number} not found"),
        })
    }

    async fn list_changed_files(&self, number: u64) -> Result<Vec<ChangedFile>, ScmError> {
        Ok(self.lock().files.get(&number).cloned().unwrap_or_default())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<(), ScmError> {
        let mut state = self.lock();
        let pull = state.pulls.get_mut(&number).ok_or(ScmError::Api {
            status: 404,
            message: format!("pull {number} not found"),
        })?;
        for label in labels {
            if !pull.labels.contains(label) {
                pull.labels.push(label.clone());
            }
        }
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<(), ScmError> {
        if let Some(pull) = self.lock().pulls.get_mut(&number) {
            pull.labels.retain(|l| l != label);
        }
        Ok(())
    }

    async fn post_comment(&self, number: u64, body: &str) -> Result<(), ScmError> {
        self.lock()
            .comments
            .entry(number)
            .or_default()
            .push(body.to_string());
        Ok(())
    }

    async fn latest_marker(&self, number: u64, prefix: &str) -> Result<Option<String>, ScmError> {
        let open = format!("<!-- {prefix} ");
        Ok(self
            .lock()
            .comments
            .get(&number)
            .and_then(|comments| {
                comments.iter().rev().find_map(|body| {
                    let payload = body.strip_prefix(&open)?.strip_suffix(" -->")?;
                    Some(payload.to_string())
                })
            }))
    }

    async fn check_runs(&self, sha: &str) -> Result<Vec<CheckRun>, ScmError> {
        Ok(self.lock().checks.get(sha).cloned().unwrap_or_default())
    }

    async fn merge_pull(&self, number: u64, _method: MergeMethod) -> Result<(), ScmError> {
        let mut state = self.lock();
        if let Some(reason) = &state.merge_rejection {
            return Err(ScmError::MergeRejected(reason.clone()));
        }
        state.merged.push(number);
        Ok(())
    }

    async fn create_issue(
        &self,
        title: &str,
        body: &str,
        _labels: &[String],
    ) -> Result<String, ScmError> {
        let mut state = self.lock();
        state.issues.push((title.to_string(), body.to_string()));
        Ok(format!("https://example.test/issues/{}", state.issues.len()))
    }
}

/// Review backend that counts requests.
#[derive(Default)]
pub struct FakeReview {
    pub requests: AtomicU32,
}

#[async_trait]
impl ReviewBackend for FakeReview {
    async fn request_review(&self, _pull: &PullRequest) -> Result<(), TierError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub enum RepairMode {
    Applied,
    Failed,
    /// Never responds; exercises the per-call timeout
    Hang,
}

pub struct FakeRepair {
    pub mode: RepairMode,
    pub submissions: Mutex<Vec<(u64, Vec<String>)>>,
}

impl FakeRepair {
    pub fn new(mode: RepairMode) -> Self {
        Self {
            mode,
            submissions: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RepairBackend for FakeRepair {
    async fn submit(&self, pull: &PullRequest, defects: &[String]) -> Result<RepairOutcome, TierError> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((pull.number, defects.to_vec()));
        match self.mode {
            RepairMode::Applied => Ok(RepairOutcome::Applied),
            RepairMode::Failed => Ok(RepairOutcome::Failed("patch did not apply".to_string())),
            RepairMode::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(RepairOutcome::Applied)
            }
        }
    }
}
