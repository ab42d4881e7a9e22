//! Operator notifications for mend escalations.
//!
//! Fire-and-forget notification fan-out for escalations raised by the
//! orchestrator's health monitor. Channels are trait objects so new
//! destinations can be added without touching callers.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Notifier, NotifyEvent};
//!
//! let notifier = Notifier::from_env();
//! notifier.notify(NotifyEvent::ThrottlingPressure {
//!     deferrals: 12,
//!     threshold: 10,
//!     repository: "acme/widgets".to_string(),
//!     timestamp: chrono::Utc::now(),
//! });
//! ```
//!
//! # Configuration
//!
//! - `SLACK_WEBHOOK_URL`: Slack incoming-webhook URL (enables the channel)
//! - `NOTIFY_DISABLED`: set to "true" to disable all notifications

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::slack::SlackChannel;
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a notifier from environment variables, enabling whichever
    /// channels are configured.
    #[must_use]
    pub fn from_env() -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
            return Self {
                channels: vec![],
                disabled: true,
            };
        }

        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![];

        let slack = SlackChannel::from_env();
        if slack.enabled() {
            info!("Slack notifications enabled");
            channels.push(Arc::new(slack));
        }

        if channels.is_empty() {
            warn!("No notification channels configured");
        }

        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a notifier with specific channels.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self {
            channels,
            disabled: false,
        }
    }

    /// Create a disabled notifier (tests, or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Send a notification to all enabled channels (fire-and-forget).
    ///
    /// Spawns a task per channel and returns immediately. Errors are logged
    /// but not propagated.
    pub fn notify(&self, event: NotifyEvent) {
        if self.disabled || self.channels.is_empty() {
            debug!("No notification channels active, skipping event");
            return;
        }

        let event = Arc::new(event);

        for channel in &self.channels {
            let channel = Arc::clone(channel);
            let event = Arc::clone(&event);

            tokio::spawn(async move {
                let channel_name = channel.name();
                match channel.send(&event).await {
                    Ok(()) => debug!(channel = channel_name, "Notification sent"),
                    Err(e) => error!(
                        channel = channel_name,
                        error = %e,
                        "Failed to send notification"
                    ),
                }
            });
        }
    }

    /// Send a notification and wait for every channel, collecting results.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if self.disabled || self.channels.is_empty() {
            return vec![];
        }

        let mut results = vec![];
        for channel in &self.channels {
            let name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((name, result));
        }
        results
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::from_env()
    }
}
