//! Priority scheduling for the work list.
//!
//! Each run scores every open change request and processes them in
//! descending score order. Scoring is deterministic for a given snapshot so
//! regressions are reproducible: ties break toward the lower (older) PR
//! number.

use chrono::{DateTime, Utc};
use scm::PullRequest;

use crate::config::{ComplexityThresholds, Config};

/// Diff size bucket, computed once per run from changed-file and
/// changed-line counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplexityTier {
    Low,
    Medium,
    High,
}

impl ComplexityTier {
    /// Steps above `Low`, used by the complexity penalty.
    #[must_use]
    pub fn penalty_steps(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }

    /// Display name for logs and dispatch summaries.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Classify a diff against the two configured thresholds.
#[must_use]
pub fn complexity_tier(
    changed_files: u32,
    changed_lines: u32,
    thresholds: &ComplexityThresholds,
) -> ComplexityTier {
    if changed_files > thresholds.files_high || changed_lines > thresholds.lines_high {
        ComplexityTier::High
    } else if changed_files > thresholds.files_medium || changed_lines > thresholds.lines_medium {
        ComplexityTier::Medium
    } else {
        ComplexityTier::Low
    }
}

/// A change request with its per-run derived fields.
#[derive(Debug, Clone)]
pub struct ScoredPull {
    pub pull: PullRequest,
    pub tier: ComplexityTier,
    pub score: f64,
}

/// Compute the priority score for one change request.
///
/// `w1*age + w2*urgency + w3*recency - w4*complexity`: age rewards waiting
/// work, urgency labels jump the queue, a very recent update signals active
/// human attention worth amplifying, and big diffs are deprioritized so
/// small wins are not starved.
#[must_use]
pub fn score(
    pull: &PullRequest,
    tier: ComplexityTier,
    config: &Config,
    now: DateTime<Utc>,
) -> f64 {
    let weights = &config.weights;

    let age_hours = pull.age_seconds(now) as f64 / 3600.0;

    let urgent = config
        .urgency_labels
        .iter()
        .any(|label| pull.has_label(label));
    let urgency = if urgent { 1.0 } else { 0.0 };

    let recency_window = chrono::Duration::minutes(config.recency_window_mins as i64);
    let recent = now - pull.updated_at <= recency_window;
    let recency = if recent { 1.0 } else { 0.0 };

    weights.age_per_hour * age_hours + weights.urgency_bonus * urgency
        + weights.recency_bonus * recency
        - weights.complexity_penalty * tier.penalty_steps()
}

/// Rank change requests by descending score, ties broken by ascending
/// number. Deterministic for a given input snapshot.
#[must_use]
pub fn rank(pulls: Vec<PullRequest>, config: &Config, now: DateTime<Utc>) -> Vec<ScoredPull> {
    let mut scored: Vec<ScoredPull> = pulls
        .into_iter()
        .map(|pull| {
            let tier = complexity_tier(pull.changed_files, pull.changed_lines(), &config.complexity);
            let score = score(&pull, tier, config, now);
            ScoredPull { pull, tier, score }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pull.number.cmp(&b.pull.number))
    });
    scored
}
