//! Top-level run loop.
//!
//! A run is one sweep over the repository: list open change requests,
//! rank them, dispatch the top of the queue through a bounded worker pool
//! under a wall-clock deadline, then fold the run into the health history
//! and raise any escalations.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use notify::{Notifier, NotifyEvent};
use scm::{PullRequest, ScmClient, ScmError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::health::{Escalation, HealthError, HealthMonitor, RunTally};
use crate::priority;
use crate::state::StateTracker;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("platform error: {0}")]
    Scm(#[from] ScmError),
    #[error(transparent)]
    Health(#[from] HealthError),
}

/// Summary of one completed run.
#[derive(Debug)]
pub struct RunReport {
    pub tally: RunTally,
    pub outcomes: Vec<(u64, DispatchOutcome)>,
    pub escalations: Vec<Escalation>,
}

pub struct Orchestrator {
    scm: Arc<dyn ScmClient>,
    dispatcher: Arc<Dispatcher>,
    monitor: HealthMonitor,
    notifier: Notifier,
    config: Arc<Config>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        scm: Arc<dyn ScmClient>,
        dispatcher: Arc<Dispatcher>,
        monitor: HealthMonitor,
        notifier: Notifier,
        config: Arc<Config>,
    ) -> Self {
        Self {
            scm,
            dispatcher,
            monitor,
            notifier,
            config,
        }
    }

    /// Execute one sweep.
    pub async fn run(&mut self) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let now = Utc::now();
        let deadline = started + std::time::Duration::from_secs(self.config.run_deadline_secs);

        let open = self.scm.list_open_pulls().await?;
        let stuck = self.count_stuck(&open, now);
        info!(open = open.len(), stuck, "Starting run");

        let hydrated = self.hydrate(open).await;
        let mut ranked = priority::rank(hydrated, &self.config, now);
        ranked.truncate(self.config.max_per_run);

        let dispatcher = Arc::clone(&self.dispatcher);
        let outcomes: Vec<(u64, DispatchOutcome)> = stream::iter(ranked)
            .map(|scored| {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    let number = scored.pull.number;
                    // Checked per change request so the deadline cuts the
                    // tail of the queue, not work already in flight
                    let outcome = if Instant::now() >= deadline {
                        dispatcher.record_deadline_deferral(&scored.pull)
                    } else {
                        dispatcher.process(&scored).await
                    };
                    (number, outcome)
                }
            })
            .buffer_unordered(self.config.worker_limit)
            .collect()
            .await;

        let tally = self.dispatcher.take_tally();
        let escalations = self.monitor.record_and_evaluate(
            tally.clone(),
            stuck,
            &self.config.health,
            chrono::Duration::minutes(
                i64::try_from(self.config.escalation_cooldown_mins).unwrap_or(i64::MAX),
            ),
            now,
        )?;

        for escalation in &escalations {
            self.escalate(escalation, now).await;
        }

        self.notifier.notify(NotifyEvent::RunCompleted {
            repository: self.config.repository.clone(),
            processed: tally.processed,
            merged: tally.merged,
            deferred: tally.deferred,
            failures: tally.failures,
            timestamp: now,
        });

        info!(
            processed = tally.processed,
            merged = tally.merged,
            deferred = tally.deferred,
            failures = tally.failures,
            elapsed_secs = started.elapsed().as_secs(),
            "Run complete"
        );

        Ok(RunReport {
            tally,
            outcomes,
            escalations,
        })
    }

    /// Change requests wearing any status label whose last update is past
    /// the staleness horizon. Approved pulls count too: one blocked on an
    /// unmet merge precondition for days is just as stuck as one waiting
    /// on a specialist.
    fn count_stuck(&self, pulls: &[PullRequest], now: chrono::DateTime<chrono::Utc>) -> u32 {
        let horizon =
            chrono::Duration::hours(i64::try_from(self.config.staleness_hours).unwrap_or(i64::MAX));
        let count = pulls
            .iter()
            .filter(|pr| {
                StateTracker::current_status(pr).is_some() && now - pr.updated_at > horizon
            })
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    /// The list endpoint omits diff counters; fetch each change request
    /// individually, keeping the summary when the fetch fails.
    async fn hydrate(&self, pulls: Vec<PullRequest>) -> Vec<PullRequest> {
        let mut hydrated = Vec::with_capacity(pulls.len());
        for pull in pulls {
            match self.scm.get_pull(pull.number).await {
                Ok(full) => hydrated.push(full),
                Err(e) => {
                    warn!(pr = pull.number, error = %e, "Hydration failed, using summary");
                    hydrated.push(pull);
                }
            }
        }
        hydrated
    }

    async fn escalate(&self, escalation: &Escalation, now: chrono::DateTime<chrono::Utc>) {
        let repository = self.config.repository.clone();
        let event = match escalation {
            Escalation::TierDegraded {
                tier,
                success_rate,
                window_runs,
            } => NotifyEvent::TierDegraded {
                tier: tier.name().to_string(),
                success_rate: *success_rate,
                floor: self.config.health.success_floor,
                window_runs: *window_runs,
                repository,
                timestamp: now,
            },
            Escalation::StuckBacklog { stuck } => NotifyEvent::StuckBacklog {
                stuck: *stuck,
                threshold: self.config.health.stuck_backlog,
                staleness_hours: self.config.staleness_hours,
                repository,
                timestamp: now,
            },
            Escalation::ThrottlingPressure { deferrals } => NotifyEvent::ThrottlingPressure {
                deferrals: *deferrals,
                threshold: self.config.health.deferral_limit,
                repository,
                timestamp: now,
            },
        };

        if self.config.tracking_issues {
            let title = format!("[mend] {}", event.title());
            let body =
                format!("Automated escalation from the remediation orchestrator.\n\n{event:#?}");
            match self
                .scm
                .create_issue(&title, &body, &["mend-escalation".to_string()])
                .await
            {
                Ok(url) => debug!(%url, "Opened tracking issue"),
                Err(e) => warn!(error = %e, "Failed to open tracking issue"),
            }
        }

        self.notifier.notify(event);
    }
}
