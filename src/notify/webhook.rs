//! Chat webhook channels
//!
//! One `WebhookChannel` per endpoint. The envelope depends on the style:
//! Slack block kit, Microsoft Teams MessageCard, or Discord embeds.
//! Any non-2xx response is a transport failure and gets retried.

use crate::notify::{AlertChannel, AlertPayload, Delivery, Severity};
use crate::utils::AppError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};

/// Slack/Discord field values are truncated past this length
const MAX_FIELD_LEN: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStyle {
    Slack,
    Teams,
    Discord,
}

impl WebhookStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStyle::Slack => "slack",
            WebhookStyle::Teams => "teams",
            WebhookStyle::Discord => "discord",
        }
    }
}

impl fmt::Display for WebhookStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slack" => Ok(WebhookStyle::Slack),
            "teams" => Ok(WebhookStyle::Teams),
            "discord" => Ok(WebhookStyle::Discord),
            other => Err(format!("unknown webhook style '{}'", other)),
        }
    }
}

/// Discord webhook message payload
#[derive(Debug, Serialize)]
struct DiscordMessage {
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    /// Decimal RGB
    color: u32,
    fields: Vec<DiscordEmbedField>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordEmbedField {
    name: String,
    value: String,
    inline: bool,
}

/// Severity colors
mod colors {
    /// Red, #E74C3C
    pub const CRITICAL: u32 = 15158332;
    /// Orange, #E67E22
    pub const WARNING: u32 = 15105570;

    pub const CRITICAL_HEX: &str = "E74C3C";
    pub const WARNING_HEX: &str = "E67E22";
}

#[derive(Debug, Clone)]
pub struct WebhookChannel {
    style: WebhookStyle,
    url: String,
    client: Client,
}

impl WebhookChannel {
    pub fn new(style: WebhookStyle, url: impl Into<String>) -> Self {
        Self {
            style,
            url: url.into(),
            client: Client::new(),
        }
    }

    /// Bound each HTTP request; the retry helper bounds the whole attempt
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, AppError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("HTTP client: {}", e)))?;
        Ok(self)
    }

    pub fn style(&self) -> WebhookStyle {
        self.style
    }

    /// Channel-specific JSON envelope
    pub fn build_body(&self, payload: &AlertPayload) -> Value {
        match self.style {
            WebhookStyle::Slack => slack_body(payload),
            WebhookStyle::Teams => teams_body(payload),
            WebhookStyle::Discord => discord_body(payload),
        }
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        self.style.as_str()
    }

    /// Host only; the path of a webhook URL is a secret
    fn recipient(&self) -> String {
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "webhook".to_string())
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<Delivery, AppError> {
        let body = self.build_body(payload);

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::delivery(format!("{} webhook request failed: {}", self.style, e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                channel = self.style.as_str(),
                status = %status,
                body = %body,
                "Webhook returned error"
            );
            return Err(AppError::delivery(format!(
                "{} webhook error: {} - {}",
                self.style, status, body
            )));
        }

        debug!(channel = self.style.as_str(), status = %status, "Webhook accepted alert");
        Ok(Delivery::Accepted)
    }
}

fn truncate(value: &str) -> String {
    if value.chars().count() <= MAX_FIELD_LEN {
        return value.to_string();
    }
    let cut: String = value.chars().take(MAX_FIELD_LEN - 3).collect();
    format!("{}...", cut)
}

fn slack_body(payload: &AlertPayload) -> Value {
    let emoji = match payload.severity() {
        Severity::Critical => ":rotating_light:",
        Severity::Warning => ":warning:",
    };

    let fields: Vec<Value> = payload
        .facts
        .iter()
        .map(|(name, value)| {
            json!({
                "type": "mrkdwn",
                "text": format!("*{}*\n{}", name, truncate(value)),
            })
        })
        .collect();

    // Slack allows at most 10 fields per section
    let mut blocks = vec![json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": format!("{} {}", emoji, payload.subject),
        }
    })];
    for chunk in fields.chunks(10) {
        blocks.push(json!({ "type": "section", "fields": chunk }));
    }
    blocks.push(json!({
        "type": "context",
        "elements": [{
            "type": "mrkdwn",
            "text": format!("rule `{}` | {}", payload.rule, payload.created_at.to_rfc3339()),
        }]
    }));

    json!({
        "text": payload.subject,
        "blocks": blocks,
    })
}

fn teams_body(payload: &AlertPayload) -> Value {
    let color = match payload.severity() {
        Severity::Critical => colors::CRITICAL_HEX,
        Severity::Warning => colors::WARNING_HEX,
    };

    let facts: Vec<Value> = payload
        .facts
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "themeColor": color,
        "summary": payload.subject,
        "title": payload.subject,
        "sections": [{
            "activityTitle": format!("Rule: {}", payload.rule),
            "activitySubtitle": payload.created_at.to_rfc3339(),
            "facts": facts,
            "markdown": true,
        }],
    })
}

fn discord_body(payload: &AlertPayload) -> Value {
    let color = match payload.severity() {
        Severity::Critical => colors::CRITICAL,
        Severity::Warning => colors::WARNING,
    };

    // Discord caps an embed at 25 fields
    let fields = payload
        .facts
        .iter()
        .take(25)
        .map(|(name, value)| DiscordEmbedField {
            name: name.clone(),
            value: truncate(value),
            inline: true,
        })
        .collect();

    let message = DiscordMessage {
        embeds: vec![DiscordEmbed {
            title: payload.subject.clone(),
            description: format!("Rule: `{}`", payload.rule),
            color,
            fields,
            timestamp: payload.created_at.to_rfc3339(),
        }],
    };

    serde_json::to_value(&message).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventType, LogCategory};
    use crate::monitoring::AlertRule;
    use chrono::Utc;

    fn payload() -> AlertPayload {
        AlertPayload {
            subject: "Rate Limit Alert: Rate Limit Violation".to_string(),
            text_body: String::new(),
            html_body: String::new(),
            category: LogCategory::RateLimit,
            event_type: EventType::RateLimitViolation,
            rule: AlertRule::RateLimitThreshold,
            facts: vec![
                ("Path".to_string(), "/api/agents".to_string()),
                ("Observed".to_string(), "12".to_string()),
            ],
            context: Value::Null,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn should_build_slack_blocks() {
        // Arrange
        let channel = WebhookChannel::new(WebhookStyle::Slack, "https://hooks.slack.com/x");

        // Act
        let body = channel.build_body(&payload());

        // Assert
        assert_eq!(body["text"], "Rate Limit Alert: Rate Limit Violation");
        assert_eq!(body["blocks"][0]["type"], "header");
        assert_eq!(body["blocks"][1]["fields"][0]["text"], "*Path*\n/api/agents");
    }

    #[test]
    fn should_build_teams_message_card() {
        // Arrange
        let channel = WebhookChannel::new(WebhookStyle::Teams, "https://outlook.office.com/x");

        // Act
        let body = channel.build_body(&payload());

        // Assert
        assert_eq!(body["@type"], "MessageCard");
        assert_eq!(body["themeColor"], "E67E22");
        assert_eq!(body["sections"][0]["facts"][1]["value"], "12");
    }

    #[test]
    fn should_build_discord_embed() {
        // Arrange
        let channel = WebhookChannel::new(WebhookStyle::Discord, "https://discord.com/api/x");

        // Act
        let body = channel.build_body(&payload());

        // Assert
        assert_eq!(body["embeds"][0]["color"], colors::WARNING);
        assert_eq!(body["embeds"][0]["fields"][0]["name"], "Path");
        assert_eq!(body["embeds"][0]["fields"][0]["inline"], true);
    }

    #[test]
    fn should_log_host_only_as_recipient() {
        // Arrange
        let channel = WebhookChannel::new(
            WebhookStyle::Slack,
            "https://hooks.slack.com/services/T000/B000/secret",
        );

        // Act & Assert
        assert_eq!(channel.recipient(), "hooks.slack.com");
        assert_eq!(channel.name(), "slack");
    }

    #[test]
    fn should_truncate_long_values() {
        // Arrange
        let long = "x".repeat(MAX_FIELD_LEN + 50);

        // Act
        let cut = truncate(&long);

        // Assert
        assert_eq!(cut.chars().count(), MAX_FIELD_LEN);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn should_parse_style_names() {
        // Arrange & Act & Assert
        assert_eq!("Slack".parse::<WebhookStyle>(), Ok(WebhookStyle::Slack));
        assert!("email".parse::<WebhookStyle>().is_err());
    }
}
