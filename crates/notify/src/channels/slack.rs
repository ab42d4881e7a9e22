//! Slack webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::error::ChannelError;
use crate::events::NotifyEvent;
use crate::NotifyChannel;

/// Environment variable for the Slack webhook URL.
pub const ENV_SLACK_WEBHOOK_URL: &str = "SLACK_WEBHOOK_URL";

/// Slack webhook notification channel.
pub struct SlackChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SlackPayload {
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    fallback: String,
    color: String,
    title: String,
    text: String,
    fields: Vec<SlackField>,
    footer: String,
    ts: i64,
}

#[derive(Debug, Serialize)]
struct SlackField {
    title: String,
    value: String,
    short: bool,
}

impl SlackChannel {
    /// Create a Slack channel from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let webhook_url = std::env::var(ENV_SLACK_WEBHOOK_URL).ok();

        if webhook_url.is_none() {
            debug!("Slack notifications disabled (SLACK_WEBHOOK_URL not set)");
        }

        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Create a Slack channel with a specific webhook URL.
    #[must_use]
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url: Some(webhook_url),
            client: reqwest::Client::new(),
        }
    }

    fn format_payload(event: &NotifyEvent) -> SlackPayload {
        let severity = event.severity();

        let attachment = SlackAttachment {
            fallback: event.title(),
            color: severity.hex_color().to_string(),
            title: event.title(),
            text: Self::format_description(event),
            fields: vec![SlackField {
                title: "Repository".to_string(),
                value: format!("`{}`", event.repository()),
                short: true,
            }],
            footer: format!(
                "{} | {}",
                severity.as_str(),
                event.timestamp().format("%Y-%m-%d %H:%M:%S UTC")
            ),
            ts: event.timestamp().timestamp(),
        };

        SlackPayload {
            attachments: vec![attachment],
        }
    }

    fn format_description(event: &NotifyEvent) -> String {
        match event {
            NotifyEvent::TierDegraded {
                tier,
                success_rate,
                floor,
                window_runs,
                ..
            } => {
                format!(
                    "The *{tier}* tier succeeded in {:.0}% of calls over the last {window_runs} runs \
                     (floor: {:.0}%). The pipeline is degraded; inspect recent failures.",
                    success_rate * 100.0,
                    floor * 100.0
                )
            }

            NotifyEvent::StuckBacklog {
                stuck,
                threshold,
                staleness_hours,
                ..
            } => {
                format!(
                    "{stuck} change requests have been stale for more than {staleness_hours}h \
                     in a non-terminal status (threshold: {threshold}). Manual triage needed."
                )
            }

            NotifyEvent::ThrottlingPressure {
                deferrals,
                threshold,
                ..
            } => {
                format!(
                    "{deferrals} actions were deferred by rate limits in a single run \
                     (threshold: {threshold}). Consider raising tier capacities."
                )
            }

            NotifyEvent::RunCompleted {
                processed,
                merged,
                deferred,
                failures,
                ..
            } => {
                format!(
                    "Processed {processed} change requests: {merged} merged, \
                     {deferred} deferred, {failures} failures."
                )
            }
        }
    }
}

#[async_trait]
impl NotifyChannel for SlackChannel {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn send(&self, event: &NotifyEvent) -> Result<(), ChannelError> {
        let url = self
            .webhook_url
            .as_ref()
            .ok_or_else(|| ChannelError::NotConfigured("slack".to_string()))?;

        let payload = Self::format_payload(event);
        let response = self.client.post(url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected {
                status: status.as_u16(),
            });
        }

        debug!(event = %event.title(), "Slack notification delivered");
        Ok(())
    }
}
