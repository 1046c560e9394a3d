//! Alert delivery
//!
//! `Notifier` is the boundary the monitor talks to. `NotifierSet` fans a
//! payload out to every configured `AlertChannel`, wrapping each channel in
//! the shared retry helper.

pub mod email;
pub mod retry;
pub mod webhook;

pub use email::EmailChannel;
pub use retry::{with_retry, RetryPolicy};
pub use webhook::{WebhookChannel, WebhookStyle};

use crate::config::MonitorConfig;
use crate::event::{EventType, LogCategory};
use crate::monitoring::AlertRule;
use crate::utils::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Composed alert, ready for any channel
#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub category: LogCategory,
    pub event_type: EventType,
    pub rule: AlertRule,
    /// Ordered (label, value) pairs shown by chat channels
    pub facts: Vec<(String, String)>,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
}

impl AlertPayload {
    pub fn severity(&self) -> Severity {
        match self.rule {
            AlertRule::UnauthorizedAccessThreshold
            | AlertRule::MissingAuthHeaderOverride
            | AlertRule::ErrorBurst => Severity::Critical,
            _ => Severity::Warning,
        }
    }
}

/// Result of one accepted round-trip with a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The channel answered and refused the message; not retried
    Rejected(String),
}

/// Sends alerts; true means at least one channel accepted the payload
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, payload: &AlertPayload) -> bool;
}

/// A single transport (SMTP server, webhook endpoint)
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Where the alert goes, safe to log
    fn recipient(&self) -> String;

    async fn deliver(&self, payload: &AlertPayload) -> Result<Delivery, AppError>;
}

/// All enabled channels behind one `Notifier`
#[derive(Clone, Default)]
pub struct NotifierSet {
    channels: Vec<Arc<dyn AlertChannel>>,
    retry: RetryPolicy,
}

impl NotifierSet {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            channels: Vec::new(),
            retry,
        }
    }

    /// Every channel the configuration enables; a channel that fails to build is skipped
    pub fn from_config(config: &MonitorConfig) -> Self {
        let mut set = Self::new(config.retry.clone());
        let attempt_timeout = config.retry.attempt_timeout;

        if let Some(smtp) = &config.smtp {
            match EmailChannel::new(smtp, attempt_timeout) {
                Ok(channel) => set.add_channel(Arc::new(channel)),
                Err(e) => warn!(error = %e, "Email channel disabled"),
            }
        }

        for webhook in &config.webhooks {
            let channel = WebhookChannel::new(webhook.style, webhook.url.clone());
            match channel.with_timeout(attempt_timeout) {
                Ok(channel) => set.add_channel(Arc::new(channel)),
                Err(e) => warn!(channel = %webhook.style, error = %e, "Webhook channel disabled"),
            }
        }

        info!(channels = ?set.channel_names(), "Alert channels configured");
        set
    }

    pub fn with_channel(mut self, channel: impl AlertChannel + 'static) -> Self {
        self.channels.push(Arc::new(channel));
        self
    }

    pub fn add_channel(&mut self, channel: Arc<dyn AlertChannel>) {
        self.channels.push(channel);
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    async fn send_via(&self, channel: &dyn AlertChannel, payload: &AlertPayload) -> bool {
        let recipient = channel.recipient();
        let recipient = recipient.as_str();

        let result = with_retry(&self.retry, |attempt| async move {
            info!(
                channel = channel.name(),
                recipient = recipient,
                attempt = attempt,
                "Sending alert"
            );
            let outcome = channel.deliver(payload).await;
            match &outcome {
                Ok(Delivery::Accepted) => info!(
                    channel = channel.name(),
                    recipient = recipient,
                    attempt = attempt,
                    "Alert delivered"
                ),
                Ok(Delivery::Rejected(reason)) => warn!(
                    channel = channel.name(),
                    recipient = recipient,
                    attempt = attempt,
                    reason = %reason,
                    "Alert rejected by channel"
                ),
                Err(e) => warn!(
                    channel = channel.name(),
                    recipient = recipient,
                    attempt = attempt,
                    error = %e,
                    error_code = e.error_code(),
                    "Alert delivery attempt failed"
                ),
            }
            outcome
        })
        .await;

        match result {
            Ok(Delivery::Accepted) => true,
            Ok(Delivery::Rejected(_)) => false,
            Err(e) => {
                error!(
                    channel = channel.name(),
                    recipient = recipient,
                    error = %e,
                    "Alert delivery failed, giving up"
                );
                false
            }
        }
    }
}

#[async_trait]
impl Notifier for NotifierSet {
    #[instrument(skip(self, payload), fields(subject = %payload.subject, rule = %payload.rule))]
    async fn send(&self, payload: &AlertPayload) -> bool {
        if self.channels.is_empty() {
            warn!("No alert channels configured, alert not delivered");
            return false;
        }

        let mut delivered = false;
        for channel in &self.channels {
            if self.send_via(channel.as_ref(), payload).await {
                delivered = true;
            }
        }
        delivered
    }
}
