//! Automerge gate: the pipeline's terminal action.
//!
//! A merge happens only when every precondition holds at once: approved
//! status, not a draft, base branch matches the configured target, and the
//! required checks are green. Anything else is a normal `Blocked` outcome
//! with the specific unmet precondition, never an error; the change request
//! is simply reconsidered next run.

use std::fmt;
use std::sync::Arc;

use scm::{CheckRun, MergeMethod, PullRequest, ScmClient, ScmError};
use tracing::{info, warn};

use crate::state::{StateTracker, Status};

/// The specific precondition that blocked a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeBlock {
    /// Status label is not `approved`
    NotApproved,
    /// The change request is a draft
    Draft,
    /// Base branch differs from the configured merge target
    BaseMismatch { expected: String, actual: String },
    /// Required checks are pending or failed
    ChecksNotGreen,
    /// The platform rejected the merge call itself
    Rejected(String),
}

impl fmt::Display for MergeBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApproved => write!(f, "not approved"),
            Self::Draft => write!(f, "draft"),
            Self::BaseMismatch { expected, actual } => {
                write!(f, "base branch is {actual}, target is {expected}")
            }
            Self::ChecksNotGreen => write!(f, "checks not green"),
            Self::Rejected(reason) => write!(f, "platform rejected merge: {reason}"),
        }
    }
}

/// Result of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    Merged,
    Blocked(MergeBlock),
}

/// Evaluate the four preconditions; `None` means all hold.
#[must_use]
pub fn evaluate(
    status: Option<Status>,
    pull: &PullRequest,
    target_branch: &str,
    checks_green: bool,
) -> Option<MergeBlock> {
    if status != Some(Status::Approved) {
        return Some(MergeBlock::NotApproved);
    }
    if pull.draft {
        return Some(MergeBlock::Draft);
    }
    if pull.base_ref != target_branch {
        return Some(MergeBlock::BaseMismatch {
            expected: target_branch.to_string(),
            actual: pull.base_ref.clone(),
        });
    }
    if !checks_green {
        return Some(MergeBlock::ChecksNotGreen);
    }
    None
}

/// Whether the required checks are green.
///
/// With an allow-list, every listed check must be present and green, and
/// checks outside the list cannot block. With an empty list every check on
/// the head commit must be green (vacuously true when there are none).
#[must_use]
pub fn checks_green(checks: &[CheckRun], required: &[String]) -> bool {
    if required.is_empty() {
        return checks.iter().all(CheckRun::is_green);
    }
    required.iter().all(|name| {
        checks
            .iter()
            .any(|check| &check.name == name && check.is_green())
    })
}

/// Gate performing the merge with a statically configured strategy.
pub struct MergeGate {
    scm: Arc<dyn ScmClient>,
    target_branch: String,
    method: MergeMethod,
    required_checks: Vec<String>,
}

impl MergeGate {
    /// Create a gate for the configured target and strategy.
    #[must_use]
    pub fn new(
        scm: Arc<dyn ScmClient>,
        target_branch: String,
        method: MergeMethod,
        required_checks: Vec<String>,
    ) -> Self {
        Self {
            scm,
            target_branch,
            method,
            required_checks,
        }
    }

    /// Attempt to merge a change request.
    ///
    /// Polls the head commit's checks, re-validates every precondition, and
    /// only then calls the platform. Label cleanup is implicit: the
    /// platform closes the change request on merge.
    pub async fn merge(&self, pull: &PullRequest) -> Result<MergeDecision, ScmError> {
        let status = StateTracker::current_status(pull);

        let green = if status == Some(Status::Approved) {
            let checks = self.scm.check_runs(&pull.head_sha).await?;
            checks_green(&checks, &self.required_checks)
        } else {
            false
        };

        if let Some(block) = evaluate(status, pull, &self.target_branch, green) {
            warn!(pr = pull.number, reason = %block, "Merge blocked");
            return Ok(MergeDecision::Blocked(block));
        }

        match self.scm.merge_pull(pull.number, self.method).await {
            Ok(()) => {
                info!(pr = pull.number, method = self.method.as_str(), "Merged");
                Ok(MergeDecision::Merged)
            }
            Err(ScmError::MergeRejected(reason)) => {
                warn!(pr = pull.number, reason = %reason, "Platform rejected merge");
                Ok(MergeDecision::Blocked(MergeBlock::Rejected(reason)))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pull(draft: bool, base: &str) -> PullRequest {
        PullRequest {
            number: 1,
            title: "PR".into(),
            head_sha: "abc".into(),
            head_ref: "feat".into(),
            base_ref: base.into(),
            draft,
            labels: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            changed_files: 1,
            additions: 1,
            deletions: 0,
            html_url: String::new(),
        }
    }

    fn check(name: &str, status: &str, conclusion: Option<&str>) -> CheckRun {
        CheckRun {
            name: name.into(),
            status: status.into(),
            conclusion: conclusion.map(ToString::to_string),
        }
    }

    /// All 16 combinations of the four boolean preconditions: the gate
    /// passes only when every one of them holds.
    #[test]
    fn gate_soundness_over_all_precondition_combinations() {
        for bits in 0u8..16 {
            let approved = bits & 1 != 0;
            let non_draft = bits & 2 != 0;
            let base_matches = bits & 4 != 0;
            let green = bits & 8 != 0;

            let status = if approved {
                Some(Status::Approved)
            } else {
                Some(Status::NeedsReview)
            };
            let pr = pull(!non_draft, if base_matches { "main" } else { "develop" });

            let block = evaluate(status, &pr, "main", green);
            if approved && non_draft && base_matches && green {
                assert_eq!(block, None, "bits {bits:#06b}");
            } else {
                assert!(block.is_some(), "bits {bits:#06b}");
            }
        }
    }

    #[test]
    fn first_unmet_precondition_is_reported() {
        let pr = pull(true, "develop");
        assert_eq!(
            evaluate(None, &pr, "main", false),
            Some(MergeBlock::NotApproved)
        );
        assert_eq!(
            evaluate(Some(Status::Approved), &pr, "main", false),
            Some(MergeBlock::Draft)
        );

        let pr = pull(false, "develop");
        assert!(matches!(
            evaluate(Some(Status::Approved), &pr, "main", true),
            Some(MergeBlock::BaseMismatch { .. })
        ));

        let pr = pull(false, "main");
        assert_eq!(
            evaluate(Some(Status::Approved), &pr, "main", false),
            Some(MergeBlock::ChecksNotGreen)
        );
        assert_eq!(evaluate(Some(Status::Approved), &pr, "main", true), None);
    }

    #[test]
    fn empty_allow_list_requires_every_check() {
        let checks = vec![
            check("build", "completed", Some("success")),
            check("lint", "completed", Some("failure")),
        ];
        assert!(!checks_green(&checks, &[]));

        let checks = vec![check("build", "completed", Some("success"))];
        assert!(checks_green(&checks, &[]));

        // No checks at all: vacuously green
        assert!(checks_green(&[], &[]));
    }

    #[test]
    fn allow_list_ignores_informational_checks() {
        let checks = vec![
            check("build", "completed", Some("success")),
            check("coverage-report", "completed", Some("failure")),
        ];
        let required = vec!["build".to_string()];
        assert!(checks_green(&checks, &required));

        // A required check that is pending blocks the merge
        let checks = vec![
            check("build", "in_progress", None),
            check("coverage-report", "completed", Some("success")),
        ];
        assert!(!checks_green(&checks, &required));

        // A required check that is absent blocks the merge
        assert!(!checks_green(&[], &required));
    }
}
