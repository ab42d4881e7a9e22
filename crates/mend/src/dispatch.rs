//! Per-change-request dispatch.
//!
//! Each ranked change request is routed by its current status label:
//! unreviewed ones go to the review tier, repairable ones to the repair
//! tier, exhausted ones to fallback agent dispatch, approved ones to the
//! merge gate. Every step is governed by the rate limiter and bounded by
//! the per-call timeout, and a failure on one change request never
//! prevents the rest of the batch from being processed.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use scm::{CheckRun, PullRequest, ScmClient};
use tracing::{debug, error, info, warn};

use crate::automerge::{MergeDecision, MergeGate};
use crate::config::Config;
use crate::domains;
use crate::health::RunTally;
use crate::priority::{ComplexityTier, ScoredPull};
use crate::ratelimit::{Acquire, RateLimitGovernor, TierKind};
use crate::state::{StateError, StateTracker, Status};
use crate::tiers::{RepairBackend, RepairOutcome, ReviewBackend};

/// Marker comment prefix recording the head commit a review covered.
pub const REVIEW_MARKER: &str = "mend:reviewed";

/// A rejected transition means the label state moved under us; everything
/// else is an ordinary platform failure.
fn transition_failure(e: StateError) -> DispatchOutcome {
    match e {
        StateError::InvalidTransition { .. } => DispatchOutcome::InvariantViolation,
        other => DispatchOutcome::Failed(other.to_string()),
    }
}

/// What happened to a single change request during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Opted out via the skip label
    Skipped,
    /// Entered the pipeline and a review was requested
    ReviewRequested,
    /// Head commit already reviewed, verdict still pending
    ReviewUpToDate,
    /// Review covered the head and checks reported defects, handed to repair
    DefectsFound,
    /// Review covered the head and every check is green, promoted to approved
    ReviewPassed,
    /// Repair tier accepted and applied a fix
    RepairApplied,
    /// Repair tier gave up, handed to fallback
    RepairFailed,
    /// Agent labels applied for human-visible routing
    FallbackDispatched,
    /// Agent labels already current
    FallbackCurrent,
    Merged,
    /// Merge precondition unmet; the reason is posted on the thread
    MergeBlocked(String),
    /// State machine rejected a transition; the change request is left
    /// alone this run
    InvariantViolation,
    /// Rate limit governor deferred the tier action to a later run
    Deferred(TierKind),
    /// Run deadline passed before this change request was reached
    DeadlineDeferred,
    /// A platform or backend call failed; retried next run
    Failed(String),
}

impl DispatchOutcome {
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_) | Self::DeadlineDeferred)
    }
}

/// Routes one change request per call and accumulates run accounting.
pub struct Dispatcher {
    scm: Arc<dyn ScmClient>,
    state: StateTracker,
    governor: Arc<RateLimitGovernor>,
    review: Arc<dyn ReviewBackend>,
    repair: Arc<dyn RepairBackend>,
    gate: MergeGate,
    config: Arc<Config>,
    call_timeout: Duration,
    tally: Mutex<RunTally>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        scm: Arc<dyn ScmClient>,
        governor: Arc<RateLimitGovernor>,
        review: Arc<dyn ReviewBackend>,
        repair: Arc<dyn RepairBackend>,
        gate: MergeGate,
        config: Arc<Config>,
    ) -> Self {
        let call_timeout = Duration::from_secs(config.call_timeout_secs);
        Self {
            state: StateTracker::new(Arc::clone(&scm)),
            scm,
            governor,
            review,
            repair,
            gate,
            config,
            call_timeout,
            tally: Mutex::new(RunTally::default()),
        }
    }

    /// Drain the accumulated run counters.
    pub fn take_tally(&self) -> RunTally {
        std::mem::take(&mut self.lock_tally())
    }

    fn lock_tally(&self) -> std::sync::MutexGuard<'_, RunTally> {
        self.tally.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process one ranked change request. Errors are converted into
    /// outcomes so one bad change request cannot abort the batch.
    pub async fn process(&self, scored: &ScoredPull) -> DispatchOutcome {
        let pull = &scored.pull;
        let outcome = self.route(scored).await;

        let mut tally = self.lock_tally();
        tally.processed += 1;
        match &outcome {
            DispatchOutcome::Merged => tally.merged += 1,
            DispatchOutcome::Deferred(_) | DispatchOutcome::DeadlineDeferred => {
                tally.deferred += 1;
            }
            DispatchOutcome::Failed(_) => tally.failures += 1,
            DispatchOutcome::InvariantViolation => tally.invariant_violations += 1,
            _ => {}
        }
        drop(tally);

        info!(pr = pull.number, outcome = ?outcome, "Processed");
        outcome
    }

    async fn route(&self, scored: &ScoredPull) -> DispatchOutcome {
        let pull = &scored.pull;
        if pull.has_label(&self.config.skip_label) {
            debug!(pr = pull.number, "Skip label present");
            return DispatchOutcome::Skipped;
        }

        match StateTracker::current_status(pull) {
            None => self.enter_pipeline(pull).await,
            Some(Status::NeedsReview) => self.review_sync(pull).await,
            Some(Status::NeedsRepair) => self.repair(pull).await,
            Some(Status::NeedsFallback) => self.fallback(pull, scored.tier).await,
            Some(Status::Approved) => self.merge(pull).await,
        }
    }

    /// Unlabeled change request: label it and request the first review.
    async fn enter_pipeline(&self, pull: &PullRequest) -> DispatchOutcome {
        match self
            .state
            .transition(pull, Status::NeedsReview, "entering remediation")
            .await
        {
            Ok(()) => self.request_review(pull).await,
            Err(e) => transition_failure(e),
        }
    }

    /// Already in review: request a fresh review when the head commit
    /// moved past the recorded marker, otherwise observe the verdict the
    /// checks report for the reviewed head.
    async fn review_sync(&self, pull: &PullRequest) -> DispatchOutcome {
        match self.scm.latest_marker(pull.number, REVIEW_MARKER).await {
            Ok(Some(sha)) if sha == pull.head_sha => self.observe_verdict(pull).await,
            Ok(_) => self.request_review(pull).await,
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    /// Advance a reviewed change request on its check verdict: defects go
    /// to the repair tier, a fully green board is promoted to approved, and
    /// anything still running waits for a later run.
    async fn observe_verdict(&self, pull: &PullRequest) -> DispatchOutcome {
        let checks = match self.scm.check_runs(&pull.head_sha).await {
            Ok(checks) => checks,
            Err(e) => return DispatchOutcome::Failed(e.to_string()),
        };

        if checks.iter().any(CheckRun::is_red) {
            return match self
                .state
                .transition(pull, Status::NeedsRepair, "checks reported defects")
                .await
            {
                Ok(()) => DispatchOutcome::DefectsFound,
                Err(e) => transition_failure(e),
            };
        }

        // No checks yet, or some still running: no verdict to act on
        if checks.is_empty() || !checks.iter().all(CheckRun::is_green) {
            debug!(pr = pull.number, "Review covers current head, verdict pending");
            return DispatchOutcome::ReviewUpToDate;
        }

        match self
            .state
            .transition(pull, Status::Approved, "review covered head, checks green")
            .await
        {
            Ok(()) => DispatchOutcome::ReviewPassed,
            Err(e) => transition_failure(e),
        }
    }

    async fn request_review(&self, pull: &PullRequest) -> DispatchOutcome {
        match self.governor.try_acquire(TierKind::Review, chrono::Utc::now()) {
            Acquire::Granted => {}
            Acquire::Deferred => {
                debug!(pr = pull.number, "Review tier throttled");
                return DispatchOutcome::Deferred(TierKind::Review);
            }
        }

        let call = tokio::time::timeout(self.call_timeout, self.review.request_review(pull));
        let result = match call.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "review backend timed out after {}s",
                self.call_timeout.as_secs()
            )),
        };
        self.lock_tally()
            .record_attempt(TierKind::Review, result.is_ok());

        match result {
            Ok(()) => {
                let marker = format!("<!-- {REVIEW_MARKER} {} -->", pull.head_sha);
                if let Err(e) = self.scm.post_comment(pull.number, &marker).await {
                    warn!(pr = pull.number, error = %e, "Failed to record review marker");
                }
                DispatchOutcome::ReviewRequested
            }
            Err(reason) => {
                error!(pr = pull.number, %reason, "Review request failed");
                DispatchOutcome::Failed(reason)
            }
        }
    }

    /// Repair tier: submit the failing checks as defects. A failed or
    /// timed-out repair demotes the change request to fallback.
    async fn repair(&self, pull: &PullRequest) -> DispatchOutcome {
        match self.governor.try_acquire(TierKind::Repair, chrono::Utc::now()) {
            Acquire::Granted => {}
            Acquire::Deferred => return DispatchOutcome::Deferred(TierKind::Repair),
        }

        let defects = match self.scm.check_runs(&pull.head_sha).await {
            Ok(checks) => checks
                .iter()
                .filter(|c| c.is_red())
                .map(|c| c.name.clone())
                .collect::<Vec<_>>(),
            Err(e) => {
                self.lock_tally().record_attempt(TierKind::Repair, false);
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let call = tokio::time::timeout(self.call_timeout, self.repair.submit(pull, &defects));
        let outcome = match call.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => RepairOutcome::Failed(e.to_string()),
            Err(_) => RepairOutcome::Failed(format!(
                "repair backend timed out after {}s",
                self.call_timeout.as_secs()
            )),
        };

        match outcome {
            RepairOutcome::Applied => {
                self.lock_tally().record_attempt(TierKind::Repair, true);
                match self
                    .state
                    .transition(pull, Status::NeedsReview, "repair applied, re-reviewing")
                    .await
                {
                    Ok(()) => DispatchOutcome::RepairApplied,
                    Err(e) => transition_failure(e),
                }
            }
            RepairOutcome::Failed(reason) => {
                self.lock_tally().record_attempt(TierKind::Repair, false);
                warn!(pr = pull.number, %reason, "Repair failed, demoting to fallback");
                match self
                    .state
                    .transition(pull, Status::NeedsFallback, &format!("repair failed: {reason}"))
                    .await
                {
                    Ok(()) => DispatchOutcome::RepairFailed,
                    Err(e) => transition_failure(e),
                }
            }
        }
    }

    /// Fallback tier: classify the diff and apply agent routing labels,
    /// summarizing the diff's complexity for the specialists. Idempotent
    /// when the labels are already present.
    async fn fallback(&self, pull: &PullRequest, tier: ComplexityTier) -> DispatchOutcome {
        let files = match self.scm.list_changed_files(pull.number).await {
            Ok(files) => files,
            Err(e) => return DispatchOutcome::Failed(e.to_string()),
        };
        let domains = domains::classify(&files);
        let missing: Vec<_> = domains
            .iter()
            .filter(|d| !pull.has_label(&d.label()))
            .copied()
            .collect();
        if missing.is_empty() {
            return DispatchOutcome::FallbackCurrent;
        }

        match self.governor.try_acquire(TierKind::Fallback, chrono::Utc::now()) {
            Acquire::Granted => {}
            Acquire::Deferred => return DispatchOutcome::Deferred(TierKind::Fallback),
        }

        let result = self.state.set_agent_labels(pull, &missing).await;
        self.lock_tally()
            .record_attempt(TierKind::Fallback, result.is_ok());
        if let Err(e) = result {
            return DispatchOutcome::Failed(e.to_string());
        }

        let names: Vec<&str> = domains.iter().map(|d| d.name()).collect();
        let note = format!(
            "mend: automated repair exhausted, routed to agents: {} (complexity: {})",
            names.join(", "),
            tier.name()
        );
        if let Err(e) = self.scm.post_comment(pull.number, &note).await {
            warn!(pr = pull.number, error = %e, "Failed to post fallback note");
        }
        DispatchOutcome::FallbackDispatched
    }

    async fn merge(&self, pull: &PullRequest) -> DispatchOutcome {
        match self.gate.merge(pull).await {
            Ok(MergeDecision::Merged) => DispatchOutcome::Merged,
            Ok(MergeDecision::Blocked(block)) => {
                let reason = block.to_string();
                let note = format!("mend: merge blocked, {reason}");
                if let Err(e) = self.scm.post_comment(pull.number, &note).await {
                    warn!(pr = pull.number, error = %e, "Failed to post merge-block note");
                }
                DispatchOutcome::MergeBlocked(reason)
            }
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    /// Record a change request the run deadline cut off.
    pub fn record_deadline_deferral(&self, pull: &PullRequest) -> DispatchOutcome {
        let mut tally = self.lock_tally();
        tally.processed += 1;
        tally.deferred += 1;
        drop(tally);
        debug!(pr = pull.number, "Run deadline reached, deferring");
        DispatchOutcome::DeadlineDeferred
    }
}
