//! Label-backed state machine for change requests.
//!
//! The hosting platform's label storage is the serialization format; this
//! module owns which label means what and which transitions are legal. At
//! most one status label is authoritative at a time; the tracker enforces
//! that by rewriting the whole status set on every transition.

use std::sync::Arc;

use scm::{PullRequest, ScmClient, ScmError};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::domains::AgentDomain;

/// Pipeline stage of a change request, encoded as a status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Waiting for (re-)review
    NeedsReview,
    /// Review found defects; waiting for the repair capability
    NeedsRepair,
    /// Repair gave up; waiting for a specialist or a human
    NeedsFallback,
    /// Review passed; eligible for automerge
    Approved,
}

impl Status {
    /// All status labels, in pipeline order.
    pub const ALL: [Status; 4] = [
        Status::NeedsReview,
        Status::NeedsRepair,
        Status::NeedsFallback,
        Status::Approved,
    ];

    /// The label this status serializes to.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NeedsReview => "needs-review",
            Self::NeedsRepair => "needs-repair",
            Self::NeedsFallback => "needs-fallback",
            Self::Approved => "approved",
        }
    }

    /// Parse a label name into a status.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "needs-review" => Some(Self::NeedsReview),
            "needs-repair" => Some(Self::NeedsRepair),
            "needs-fallback" => Some(Self::NeedsFallback),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }

    /// How far along the pipeline this status is; used only to resolve the
    /// recoverable multiple-label inconsistency on read.
    fn progress(self) -> u8 {
        match self {
            Self::NeedsReview => 0,
            Self::NeedsRepair => 1,
            Self::NeedsFallback => 2,
            Self::Approved => 3,
        }
    }
}

/// Errors from state-machine operations.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested transition is not in the valid-transition table
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Option<Status>, to: Status },

    /// The platform call applying the transition failed
    #[error(transparent)]
    Scm(#[from] ScmError),
}

/// Whether `from -> to` is in the valid-transition table.
#[must_use]
pub fn transition_allowed(from: Option<Status>, to: Status) -> bool {
    matches!(
        (from, to),
        (None, Status::NeedsReview)
            | (Some(Status::NeedsReview), Status::NeedsRepair | Status::Approved)
            | (Some(Status::NeedsRepair), Status::NeedsFallback | Status::NeedsReview)
            | (Some(Status::NeedsFallback), Status::NeedsReview)
    )
}

/// Single writer of status labels.
pub struct StateTracker {
    scm: Arc<dyn ScmClient>,
}

impl StateTracker {
    /// Create a tracker over a platform client.
    #[must_use]
    pub fn new(scm: Arc<dyn ScmClient>) -> Self {
        Self { scm }
    }

    /// Read the authoritative status from a label snapshot.
    ///
    /// Seeing more than one status label is a recoverable inconsistency
    /// (e.g. a crash between relabel sub-operations): the most advanced
    /// status wins and the next transition rewrites the whole set.
    #[must_use]
    pub fn current_status(pr: &PullRequest) -> Option<Status> {
        let mut present: Vec<Status> = pr
            .labels
            .iter()
            .filter_map(|l| Status::from_label(l))
            .collect();

        if present.len() > 1 {
            warn!(
                pr = pr.number,
                labels = ?present,
                "Multiple status labels present; resolving to the most advanced"
            );
            present.sort_by_key(|s| s.progress());
        }
        present.last().copied()
    }

    /// Apply a validated transition: remove every other status label, add
    /// the new one (idempotent), and post a short status note.
    pub async fn transition(
        &self,
        pr: &PullRequest,
        to: Status,
        reason: &str,
    ) -> Result<(), StateError> {
        let from = Self::current_status(pr);

        if !transition_allowed(from, to) {
            error!(
                pr = pr.number,
                from = ?from,
                to = ?to,
                "Rejected transition not in the state table"
            );
            return Err(StateError::InvalidTransition { from, to });
        }

        for status in Status::ALL {
            if status != to && pr.has_label(status.label()) {
                self.scm.remove_label(pr.number, status.label()).await?;
            }
        }
        self.scm
            .add_labels(pr.number, &[to.label().to_string()])
            .await?;

        let note = format!("mend: status is now `{}` ({reason})", to.label());
        self.scm.post_comment(pr.number, &note).await?;

        info!(pr = pr.number, from = ?from, to = ?to, "Status transition applied");
        Ok(())
    }

    /// Attach `agent:<domain>` hint labels. These are orthogonal to status
    /// labels and never removed by transitions.
    pub async fn set_agent_labels(
        &self,
        pr: &PullRequest,
        domains: &[AgentDomain],
    ) -> Result<(), StateError> {
        let missing: Vec<String> = domains
            .iter()
            .map(|d| d.label())
            .filter(|l| !pr.has_label(l))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        self.scm.add_labels(pr.number, &missing).await?;
        Ok(())
    }
}
