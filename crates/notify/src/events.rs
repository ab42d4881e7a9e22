//! Notification event types for orchestrator escalations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - normal operations
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - immediate action required
    Critical,
}

impl Severity {
    /// Hex color used by webhook attachments.
    #[must_use]
    pub const fn hex_color(&self) -> &'static str {
        match self {
            Self::Info => "#3498db",
            Self::Warning => "#f39c12",
            Self::Critical => "#e74c3c",
        }
    }

    /// Display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events emitted by the orchestrator's health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// A remediation tier's trailing success rate fell below the floor
    TierDegraded {
        tier: String,
        success_rate: f64,
        floor: f64,
        window_runs: u32,
        repository: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Too many change requests are stale in a non-terminal status
    StuckBacklog {
        stuck: u32,
        threshold: u32,
        staleness_hours: u64,
        repository: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// Rate-limit deferrals in one run exceeded the configured count
    ThrottlingPressure {
        deferrals: u32,
        threshold: u32,
        repository: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// End-of-run summary
    RunCompleted {
        repository: String,
        processed: u32,
        merged: u32,
        deferred: u32,
        failures: u32,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Short title for this event.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::TierDegraded { tier, .. } => format!("Degraded tier: {tier}"),
            Self::StuckBacklog { stuck, .. } => format!("Stuck backlog: {stuck} change requests"),
            Self::ThrottlingPressure { deferrals, .. } => {
                format!("Throttling pressure: {deferrals} deferrals")
            }
            Self::RunCompleted { repository, .. } => format!("Run completed: {repository}"),
        }
    }

    /// Severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::TierDegraded { .. } => Severity::Critical,
            Self::StuckBacklog { .. } | Self::ThrottlingPressure { .. } => Severity::Warning,
            Self::RunCompleted { .. } => Severity::Info,
        }
    }

    /// Timestamp of this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::TierDegraded { timestamp, .. }
            | Self::StuckBacklog { timestamp, .. }
            | Self::ThrottlingPressure { timestamp, .. }
            | Self::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Repository the event concerns.
    #[must_use]
    pub fn repository(&self) -> &str {
        match self {
            Self::TierDegraded { repository, .. }
            | Self::StuckBacklog { repository, .. }
            | Self::ThrottlingPressure { repository, .. }
            | Self::RunCompleted { repository, .. } => repository,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping() {
        let event = NotifyEvent::TierDegraded {
            tier: "repair".into(),
            success_rate: 0.2,
            floor: 0.5,
            window_runs: 10,
            repository: "acme/widgets".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Critical);
        assert_eq!(event.title(), "Degraded tier: repair");

        let event = NotifyEvent::RunCompleted {
            repository: "acme/widgets".into(),
            processed: 5,
            merged: 1,
            deferred: 0,
            failures: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(event.severity(), Severity::Info);
    }
}
