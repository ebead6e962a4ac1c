// jirabackup/src/notify/mod.rs
//! Slack webhook notifications.
//!
//! Delivery is best-effort: [`SlackNotifier::notify`] has no error path, it reports what
//! happened as a [`NotifyOutcome`] and callers are free to ignore it.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::SlackConfig;
use crate::errors::Result;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The webhook request completed. Its status is not inspected.
    Delivered,
    /// No webhook configured; the message was only logged.
    Skipped,
    /// The request could not be sent.
    Failed(String),
}

#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    username: &'a str,
    text: &'a str,
    icon_emoji: &'a str,
}

pub struct SlackNotifier {
    http: reqwest::Client,
    config: SlackConfig,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Result<Self> {
        Self::with_timeout(config, WEBHOOK_TIMEOUT)
    }

    /// `timeout` caps the whole webhook request, so a hanging Slack cannot stall the run.
    pub fn with_timeout(config: SlackConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, config })
    }

    pub async fn notify(&self, message: &str) -> NotifyOutcome {
        if self.config.webhook_url.is_empty() {
            warn!("Slack webhook url is empty. No message will be posted to slack");
            info!(%message, "notification message");
            return NotifyOutcome::Skipped;
        }

        info!(channel = %self.config.channel, %message, "Notifying slack channel");
        let payload = SlackPayload {
            channel: &self.config.channel,
            username: &self.config.username,
            text: message,
            icon_emoji: &self.config.icon_emoji,
        };

        match self.http.post(&self.config.webhook_url).json(&payload).send().await {
            Ok(_) => NotifyOutcome::Delivered,
            Err(err) => {
                warn!(error = %err, "Whoops... could not post to slack");
                NotifyOutcome::Failed(err.to_string())
            }
        }
    }
}
