//! End-to-end pipeline tests against an in-memory platform double.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use notify::Notifier;

use mend::automerge::MergeGate;
use mend::config::Config;
use mend::dispatch::{DispatchOutcome, Dispatcher, REVIEW_MARKER};
use mend::health::HealthMonitor;
use mend::orchestrator::Orchestrator;
use mend::priority::{complexity_tier, ScoredPull};
use mend::ratelimit::{RateLimitGovernor, TierKind};
use mend::tiers::{RepairBackend, ReviewBackend};

use common::{
    changed_file, green_check, pull, pull_at, red_check, FakeRepair, FakeReview, InMemoryScm,
    RepairMode,
};

fn config() -> Arc<Config> {
    config_with(serde_json::json!({}))
}

/// Base test config with flat time bands so capacities are deterministic,
/// overridden per test via a JSON patch.
fn config_with(overrides: serde_json::Value) -> Arc<Config> {
    let mut base = serde_json::json!({
        "repository": "acme/widgets",
        "review_url": "http://review.test/submit",
        "repair_url": "http://repair.test/submit",
        "time_bands": { "peak": 1.0, "off_hours": 1.0, "weekend": 1.0 },
    });
    if let (Some(base_map), Some(patch)) = (base.as_object_mut(), overrides.as_object()) {
        for (key, value) in patch {
            base_map.insert(key.clone(), value.clone());
        }
    }
    Arc::new(serde_json::from_value(base).unwrap())
}

struct Harness {
    scm: Arc<InMemoryScm>,
    review: Arc<FakeReview>,
    repair: Arc<FakeRepair>,
    dispatcher: Arc<Dispatcher>,
    config: Arc<Config>,
}

impl Harness {
    fn new(config: Arc<Config>, repair_mode: RepairMode) -> Self {
        let scm = InMemoryScm::new();
        let review = Arc::new(FakeReview::default());
        let repair = Arc::new(FakeRepair::new(repair_mode));

        let governor = Arc::new(RateLimitGovernor::new(
            &config.tiers,
            config.time_bands.clone(),
            Utc::now(),
        ));
        let gate = MergeGate::new(
            Arc::clone(&scm) as Arc<dyn scm::ScmClient>,
            config.target_branch.clone(),
            config.merge_method,
            config.required_checks.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&scm) as Arc<dyn scm::ScmClient>,
            governor,
            Arc::clone(&review) as Arc<dyn ReviewBackend>,
            Arc::clone(&repair) as Arc<dyn RepairBackend>,
            gate,
            Arc::clone(&config),
        ));

        Self {
            scm,
            review,
            repair,
            dispatcher,
            config,
        }
    }

    /// Dispatch a pull by number using its live state on the platform.
    async fn dispatch(&self, number: u64) -> DispatchOutcome {
        let pull = self.scm.pull(number);
        let tier = complexity_tier(
            pull.changed_files,
            pull.changed_lines(),
            &self.config.complexity,
        );
        let scored = ScoredPull {
            pull,
            tier,
            score: 0.0,
        };
        self.dispatcher.process(&scored).await
    }

    fn orchestrator(&self, history: &std::path::Path) -> Orchestrator {
        let monitor = HealthMonitor::load(history, self.config.history_limit).unwrap();
        Orchestrator::new(
            Arc::clone(&self.scm) as Arc<dyn scm::ScmClient>,
            Arc::clone(&self.dispatcher),
            monitor,
            Notifier::disabled(),
            Arc::clone(&self.config),
        )
    }
}

#[tokio::test]
async fn unlabeled_pull_enters_review() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(1, &[]));

    let outcome = h.dispatch(1).await;

    assert_eq!(outcome, DispatchOutcome::ReviewRequested);
    assert!(h.scm.labels(1).contains(&"needs-review".to_string()));
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 1);
    // Marker comment records the reviewed head commit
    let comments = h.scm.comments(1);
    assert!(
        comments
            .iter()
            .any(|c| c.contains(REVIEW_MARKER) && c.contains("sha-1"))
    );
}

#[tokio::test]
async fn review_is_not_repeated_for_same_head() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(2, &[]));

    assert_eq!(h.dispatch(2).await, DispatchOutcome::ReviewRequested);
    // Second sweep with the same head commit finds the marker and does
    // nothing, no matter how often it runs
    assert_eq!(h.dispatch(2).await, DispatchOutcome::ReviewUpToDate);
    assert_eq!(h.dispatch(2).await, DispatchOutcome::ReviewUpToDate);
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_head_commit_triggers_re_review() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(3, &[]));
    assert_eq!(h.dispatch(3).await, DispatchOutcome::ReviewRequested);

    // Author pushes a new commit
    let mut updated = h.scm.pull(3);
    updated.head_sha = "sha-3-v2".to_string();
    h.scm.add_pull(updated);

    assert_eq!(h.dispatch(3).await, DispatchOutcome::ReviewRequested);
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_checks_after_review_demote_to_repair() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(16, &[]));
    assert_eq!(h.dispatch(16).await, DispatchOutcome::ReviewRequested);

    // Checks complete against the reviewed head and one of them fails
    h.scm
        .set_checks("sha-16", vec![green_check("build"), red_check("lint")]);

    assert_eq!(h.dispatch(16).await, DispatchOutcome::DefectsFound);
    let labels = h.scm.labels(16);
    assert!(labels.contains(&"needs-repair".to_string()));
    assert!(!labels.contains(&"needs-review".to_string()));
    // Observing the verdict is a read, not a second review request
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn green_checks_after_review_promote_to_approved() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(17, &[]));
    assert_eq!(h.dispatch(17).await, DispatchOutcome::ReviewRequested);

    h.scm
        .set_checks("sha-17", vec![green_check("build"), green_check("lint")]);

    assert_eq!(h.dispatch(17).await, DispatchOutcome::ReviewPassed);
    assert!(h.scm.labels(17).contains(&"approved".to_string()));

    // The following sweep runs the merge gate on the promoted pull
    assert_eq!(h.dispatch(17).await, DispatchOutcome::Merged);
    assert_eq!(h.scm.merged(), vec![17]);
}

#[tokio::test]
async fn successful_repair_returns_to_review() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(4, &["needs-repair"]));
    h.scm
        .set_checks("sha-4", vec![green_check("build"), red_check("lint")]);

    let outcome = h.dispatch(4).await;

    assert_eq!(outcome, DispatchOutcome::RepairApplied);
    let labels = h.scm.labels(4);
    assert!(labels.contains(&"needs-review".to_string()));
    assert!(!labels.contains(&"needs-repair".to_string()));

    // Only the failing check was submitted as a defect
    let submissions = h.repair.submissions.lock().unwrap();
    assert_eq!(submissions.as_slice(), &[(4, vec!["lint".to_string()])]);
}

#[tokio::test]
async fn failed_repair_demotes_to_fallback() {
    let h = Harness::new(config(), RepairMode::Failed);
    h.scm.add_pull(pull(5, &["needs-repair"]));
    h.scm.set_checks("sha-5", vec![red_check("build")]);

    assert_eq!(h.dispatch(5).await, DispatchOutcome::RepairFailed);
    let labels = h.scm.labels(5);
    assert!(labels.contains(&"needs-fallback".to_string()));
    assert!(!labels.contains(&"needs-repair".to_string()));
}

#[tokio::test(start_paused = true)]
async fn hung_repair_backend_times_out_and_demotes() {
    let h = Harness::new(
        config_with(serde_json::json!({ "call_timeout_secs": 5 })),
        RepairMode::Hang,
    );
    h.scm.add_pull(pull(6, &["needs-repair"]));
    h.scm.set_checks("sha-6", vec![red_check("build")]);

    assert_eq!(h.dispatch(6).await, DispatchOutcome::RepairFailed);
    assert!(h.scm.labels(6).contains(&"needs-fallback".to_string()));
}

#[tokio::test]
async fn fallback_routes_by_diff_domains() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(7, &["needs-fallback"]));
    h.scm.set_files(
        7,
        vec![changed_file("src/lib.rs"), changed_file("web/app.tsx")],
    );

    assert_eq!(h.dispatch(7).await, DispatchOutcome::FallbackDispatched);
    let labels = h.scm.labels(7);
    assert!(labels.contains(&"agent:rust".to_string()));
    assert!(labels.contains(&"agent:frontend".to_string()));
    // The status label itself is untouched by agent routing
    assert!(labels.contains(&"needs-fallback".to_string()));

    // Re-dispatch with the labels already applied consumes no budget
    assert_eq!(h.dispatch(7).await, DispatchOutcome::FallbackCurrent);
}

#[tokio::test]
async fn fallback_summary_reports_diff_complexity() {
    let h = Harness::new(config(), RepairMode::Applied);
    let mut wide = pull(18, &["needs-fallback"]);
    wide.changed_files = 30;
    wide.additions = 2500;
    h.scm.add_pull(wide);
    h.scm.set_files(18, vec![changed_file("src/lib.rs")]);

    assert_eq!(h.dispatch(18).await, DispatchOutcome::FallbackDispatched);
    assert!(
        h.scm
            .comments(18)
            .iter()
            .any(|c| c.contains("rust") && c.contains("complexity: high"))
    );
}

#[tokio::test]
async fn approved_pull_with_green_checks_merges() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(8, &["approved"]));
    h.scm
        .set_checks("sha-8", vec![green_check("build"), green_check("lint")]);

    assert_eq!(h.dispatch(8).await, DispatchOutcome::Merged);
    assert_eq!(h.scm.merged(), vec![8]);
}

#[tokio::test]
async fn approved_pull_with_red_checks_is_blocked_with_note() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(9, &["approved"]));
    h.scm
        .set_checks("sha-9", vec![green_check("build"), red_check("lint")]);

    let outcome = h.dispatch(9).await;

    assert_eq!(
        outcome,
        DispatchOutcome::MergeBlocked("checks not green".to_string())
    );
    assert!(h.scm.merged().is_empty());
    assert!(
        h.scm
            .comments(9)
            .iter()
            .any(|c| c.contains("merge blocked") && c.contains("checks not green"))
    );
    // The approved label stays; the merge is retried next sweep
    assert!(h.scm.labels(9).contains(&"approved".to_string()));
}

#[tokio::test]
async fn draft_and_wrong_base_block_the_gate() {
    let h = Harness::new(config(), RepairMode::Applied);

    let mut draft = pull(10, &["approved"]);
    draft.draft = true;
    h.scm.add_pull(draft);
    h.scm.set_checks("sha-10", vec![green_check("build")]);
    assert_eq!(
        h.dispatch(10).await,
        DispatchOutcome::MergeBlocked("draft".to_string())
    );

    let mut retargeted = pull(11, &["approved"]);
    retargeted.base_ref = "release-1.x".to_string();
    h.scm.add_pull(retargeted);
    h.scm.set_checks("sha-11", vec![green_check("build")]);
    assert!(matches!(
        h.dispatch(11).await,
        DispatchOutcome::MergeBlocked(reason) if reason.contains("release-1.x")
    ));

    assert!(h.scm.merged().is_empty());
}

#[tokio::test]
async fn platform_merge_rejection_is_a_blocked_outcome() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(12, &["approved"]));
    h.scm.set_checks("sha-12", vec![green_check("build")]);
    h.scm.reject_merges("base branch was modified");

    assert!(matches!(
        h.dispatch(12).await,
        DispatchOutcome::MergeBlocked(reason) if reason.contains("base branch was modified")
    ));
}

#[tokio::test]
async fn skip_label_opts_out_entirely() {
    let h = Harness::new(config(), RepairMode::Applied);
    h.scm.add_pull(pull(13, &["mend:skip"]));

    assert_eq!(h.dispatch(13).await, DispatchOutcome::Skipped);
    assert_eq!(h.scm.labels(13), vec!["mend:skip".to_string()]);
    assert!(h.scm.comments(13).is_empty());
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn status_labels_stay_mutually_exclusive_across_transitions() {
    let h = Harness::new(config(), RepairMode::Failed);
    h.scm.add_pull(pull(14, &[]));
    h.scm.set_checks("sha-14", vec![red_check("build")]);

    // entry -> review
    assert_eq!(h.dispatch(14).await, DispatchOutcome::ReviewRequested);
    // failing check observed -> repair
    assert_eq!(h.dispatch(14).await, DispatchOutcome::DefectsFound);
    // repair fails -> fallback
    assert_eq!(h.dispatch(14).await, DispatchOutcome::RepairFailed);

    let status_labels: Vec<String> = h
        .scm
        .labels(14)
        .into_iter()
        .filter(|l| {
            matches!(
                l.as_str(),
                "needs-review" | "needs-repair" | "needs-fallback" | "approved"
            )
        })
        .collect();
    assert_eq!(status_labels, vec!["needs-fallback".to_string()]);
}

#[tokio::test]
async fn rejected_transition_leaves_platform_state_untouched() {
    use mend::state::{StateError, StateTracker, Status};

    let scm = InMemoryScm::new();
    scm.add_pull(pull(15, &["approved"]));
    let tracker = StateTracker::new(Arc::clone(&scm) as Arc<dyn scm::ScmClient>);

    // Approved is terminal; demotion is not in the transition table
    let result = tracker
        .transition(&scm.pull(15), Status::NeedsRepair, "should never happen")
        .await;

    assert!(matches!(
        result,
        Err(StateError::InvalidTransition {
            from: Some(Status::Approved),
            to: Status::NeedsRepair,
        })
    ));
    assert_eq!(scm.labels(15), vec!["approved".to_string()]);
    assert!(scm.comments(15).is_empty());
}

#[tokio::test]
async fn review_tier_exhaustion_defers_the_overflow() {
    let h = Harness::new(
        config_with(serde_json::json!({
            "tiers": { "review": 1, "repair": 1, "fallback": 1 }
        })),
        RepairMode::Applied,
    );
    h.scm.add_pull(pull(20, &[]));
    h.scm.add_pull(pull(21, &[]));

    assert_eq!(h.dispatch(20).await, DispatchOutcome::ReviewRequested);
    assert_eq!(
        h.dispatch(21).await,
        DispatchOutcome::Deferred(TierKind::Review)
    );
    // The deferred pull keeps its status label and is retried next window
    assert!(h.scm.labels(21).contains(&"needs-review".to_string()));
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn full_sweep_processes_ranked_queue_and_records_history() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.jsonl");

    let h = Harness::new(config(), RepairMode::Applied);
    let old = Utc::now() - ChronoDuration::hours(30);
    h.scm.add_pull(pull_at(30, &[], old));
    h.scm.add_pull(pull(31, &["approved"]));
    h.scm
        .set_checks("sha-31", vec![green_check("build")]);
    h.scm.add_pull(pull(32, &["mend:skip"]));

    let mut orchestrator = h.orchestrator(&history);
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.tally.processed, 3);
    assert_eq!(report.tally.merged, 1);
    assert_eq!(h.scm.merged(), vec![31]);
    assert!(h.scm.labels(30).contains(&"needs-review".to_string()));

    let outcome = |n: u64| {
        report
            .outcomes
            .iter()
            .find(|(number, _)| *number == n)
            .map(|(_, o)| o.clone())
            .unwrap()
    };
    assert_eq!(outcome(30), DispatchOutcome::ReviewRequested);
    assert_eq!(outcome(31), DispatchOutcome::Merged);
    assert_eq!(outcome(32), DispatchOutcome::Skipped);

    // The run was persisted for the next invocation's trailing window
    let reloaded = HealthMonitor::load(&history, 10).unwrap();
    assert_eq!(reloaded.history().len(), 1);
    assert_eq!(reloaded.history()[0].tally.merged, 1);
}

#[tokio::test]
async fn stale_backlog_escalates_and_opens_tracking_issue() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.jsonl");

    let h = Harness::new(
        config_with(serde_json::json!({
            "tracking_issues": true,
            "health": {
                "success_floor": 0.5,
                "trailing_runs": 10,
                "stuck_backlog": 2,
                "deferral_limit": 10
            }
        })),
        RepairMode::Applied,
    );
    let stale = Utc::now() - ChronoDuration::hours(72);
    h.scm.add_pull(pull_at(40, &["needs-fallback"], stale));
    h.scm.add_pull(pull_at(41, &["needs-fallback"], stale));

    let mut orchestrator = h.orchestrator(&history);
    let report = orchestrator.run().await.unwrap();

    assert!(
        report
            .escalations
            .iter()
            .any(|e| matches!(e, mend::health::Escalation::StuckBacklog { stuck: 2 }))
    );
    let issues = h.scm.issues();
    assert_eq!(issues.len(), 1);
    assert!(issues[0].0.contains("[mend]"));
}

#[tokio::test]
async fn blocked_approved_pull_counts_toward_stuck_backlog() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.jsonl");

    // Approved but unmergeable pulls are just as stuck as unrepaired ones
    let h = Harness::new(
        config_with(serde_json::json!({
            "health": {
                "success_floor": 0.5,
                "trailing_runs": 10,
                "stuck_backlog": 1,
                "deferral_limit": 10
            }
        })),
        RepairMode::Applied,
    );
    let stale = Utc::now() - ChronoDuration::hours(72);
    h.scm.add_pull(pull_at(42, &["approved"], stale));
    h.scm.set_checks("sha-42", vec![red_check("lint")]);

    let mut orchestrator = h.orchestrator(&history);
    let report = orchestrator.run().await.unwrap();

    assert!(matches!(
        &report.outcomes[0].1,
        DispatchOutcome::MergeBlocked(_)
    ));
    assert!(
        report
            .escalations
            .iter()
            .any(|e| matches!(e, mend::health::Escalation::StuckBacklog { stuck: 1 }))
    );
}

#[tokio::test]
async fn max_per_run_caps_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.jsonl");

    let h = Harness::new(
        config_with(serde_json::json!({ "max_per_run": 2 })),
        RepairMode::Applied,
    );
    for n in 50..55 {
        h.scm.add_pull(pull(n, &[]));
    }

    let mut orchestrator = h.orchestrator(&history);
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.tally.processed, 2);
    assert_eq!(h.review.requests.load(Ordering::SeqCst), 2);
}
