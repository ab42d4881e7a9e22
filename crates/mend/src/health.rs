//! Health accounting and escalation triggers.
//!
//! A bounded run history lives in a local JSONL file. After each run the
//! monitor appends a snapshot, evaluates trailing-window success rates per
//! tier alongside backlog staleness and throttling pressure, and emits the
//! escalations that newly fire. A cooldown keeps repeat conditions from
//! spamming the escalation channel on every run.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::HealthThresholds;
use crate::ratelimit::TierKind;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("failed to read history at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write history at {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Per-run counters accumulated by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunTally {
    pub processed: u32,
    pub merged: u32,
    pub deferred: u32,
    pub failures: u32,
    /// Impossible label states or rejected transitions seen this run
    #[serde(default)]
    pub invariant_violations: u32,
    /// Dispatch attempts per tier, indexed by [`TierKind::index`]
    pub tier_attempts: [u32; 3],
    /// Successful dispatches per tier
    pub tier_successes: [u32; 3],
}

impl RunTally {
    pub fn record_attempt(&mut self, tier: TierKind, success: bool) {
        self.tier_attempts[tier.index()] += 1;
        if success {
            self.tier_successes[tier.index()] += 1;
        }
    }
}

/// One run's accounting, as persisted to the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub tally: RunTally,
    /// Open change requests stuck past the staleness horizon
    pub stuck: u32,
    /// Escalation kinds raised by this run
    #[serde(default)]
    pub escalated: Vec<String>,
}

/// A condition that crossed its threshold on this run.
#[derive(Debug, Clone, PartialEq)]
pub enum Escalation {
    TierDegraded {
        tier: TierKind,
        success_rate: f64,
        window_runs: u32,
    },
    StuckBacklog {
        stuck: u32,
    },
    ThrottlingPressure {
        deferrals: u32,
    },
}

impl Escalation {
    /// Stable kind string used for cooldown matching and persistence.
    #[must_use]
    pub fn kind(&self) -> String {
        match self {
            Self::TierDegraded { tier, .. } => format!("tier-degraded:{}", tier.name()),
            Self::StuckBacklog { .. } => "stuck-backlog".to_string(),
            Self::ThrottlingPressure { .. } => "throttling-pressure".to_string(),
        }
    }
}

/// Bounded run history backed by a JSONL file.
pub struct HealthMonitor {
    path: PathBuf,
    limit: usize,
    history: Vec<HealthSnapshot>,
}

impl HealthMonitor {
    /// Load history from disk. A missing file is an empty history.
    pub fn load(path: impl AsRef<Path>, limit: usize) -> Result<Self, HealthError> {
        let path = path.as_ref().to_path_buf();
        let history = match std::fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str(line) {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        warn!(error = %e, "Skipping malformed history line");
                        None
                    }
                })
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(HealthError::Read { path, source }),
        };
        debug!(runs = history.len(), "Loaded run history");
        Ok(Self {
            path,
            limit,
            history,
        })
    }

    #[must_use]
    pub fn history(&self) -> &[HealthSnapshot] {
        &self.history
    }

    /// Record a run and return the escalations that fire after cooldown.
    pub fn record_and_evaluate(
        &mut self,
        tally: RunTally,
        stuck: u32,
        thresholds: &HealthThresholds,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Escalation>, HealthError> {
        let mut snapshot = HealthSnapshot {
            timestamp: now,
            tally,
            stuck,
            escalated: Vec::new(),
        };

        let raised = self.evaluate(&snapshot, thresholds);
        let fired: Vec<Escalation> = raised
            .into_iter()
            .filter(|e| !self.in_cooldown(&e.kind(), cooldown, now))
            .collect();

        snapshot.escalated = fired.iter().map(Escalation::kind).collect();
        self.history.push(snapshot);
        if self.history.len() > self.limit {
            let excess = self.history.len() - self.limit;
            self.history.drain(..excess);
        }
        self.persist()?;
        Ok(fired)
    }

    /// Check trailing-window tier health plus this run's backlog and
    /// throttling counters.
    fn evaluate(&self, current: &HealthSnapshot, thresholds: &HealthThresholds) -> Vec<Escalation> {
        let mut escalations = Vec::new();

        let window: Vec<&HealthSnapshot> = self
            .history
            .iter()
            .rev()
            .take(thresholds.trailing_runs.saturating_sub(1))
            .chain(std::iter::once(current))
            .collect();
        let window_runs = u32::try_from(window.len()).unwrap_or(u32::MAX);

        let mut rates: HashMap<TierKind, (u32, u32)> = HashMap::new();
        for snapshot in &window {
            for tier in [TierKind::Review, TierKind::Repair, TierKind::Fallback] {
                let entry = rates.entry(tier).or_default();
                entry.0 += snapshot.tally.tier_attempts[tier.index()];
                entry.1 += snapshot.tally.tier_successes[tier.index()];
            }
        }
        for tier in [TierKind::Review, TierKind::Repair, TierKind::Fallback] {
            let (attempts, successes) = rates[&tier];
            // A tier with no traffic in the window is not degraded
            if attempts == 0 {
                continue;
            }
            let success_rate = f64::from(successes) / f64::from(attempts);
            if success_rate < thresholds.success_floor {
                escalations.push(Escalation::TierDegraded {
                    tier,
                    success_rate,
                    window_runs,
                });
            }
        }

        if current.stuck >= thresholds.stuck_backlog {
            escalations.push(Escalation::StuckBacklog {
                stuck: current.stuck,
            });
        }
        if current.tally.deferred > thresholds.deferral_limit {
            escalations.push(Escalation::ThrottlingPressure {
                deferrals: current.tally.deferred,
            });
        }

        escalations
    }

    /// Whether the same escalation kind fired within the cooldown window.
    fn in_cooldown(&self, kind: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        self.history
            .iter()
            .rev()
            .take_while(|s| now - s.timestamp < cooldown)
            .any(|s| s.escalated.iter().any(|k| k == kind))
    }

    fn persist(&self) -> Result<(), HealthError> {
        let wrap = |source| HealthError::Write {
            path: self.path.clone(),
            source,
        };
        let mut file = std::fs::File::create(&self.path).map_err(wrap)?;
        for snapshot in &self.history {
            let line = serde_json::to_string(snapshot).map_err(|e| wrap(e.into()))?;
            writeln!(file, "{line}").map_err(wrap)?;
        }
        Ok(())
    }
}
