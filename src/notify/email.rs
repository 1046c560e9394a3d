//! SMTP alert channel

use crate::config::{SmtpConfig, SmtpTls};
use crate::notify::{AlertChannel, AlertPayload, Delivery};
use crate::utils::AppError;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::debug;

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    recipients: Vec<Mailbox>,
    host: String,
}

impl EmailChannel {
    /// Build the transport; no connection is made until the first send
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, AppError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| AppError::configuration(format!("SMTP_FROM '{}': {}", config.from, e)))?;

        let recipients = config
            .recipients
            .iter()
            .map(|r| {
                r.parse::<Mailbox>()
                    .map_err(|e| AppError::configuration(format!("recipient '{}': {}", r, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if recipients.is_empty() {
            return Err(AppError::configuration("no alert recipients"));
        }

        let builder = match config.tls {
            SmtpTls::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host),
            SmtpTls::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
        }
        .map_err(|e| AppError::configuration(format!("SMTP relay '{}': {}", config.host, e)))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .authentication(vec![Mechanism::Plain])
            .timeout(Some(timeout))
            .build();

        Ok(Self {
            transport,
            from,
            recipients,
            host: config.host.clone(),
        })
    }

    /// multipart/alternative message with text and HTML parts
    pub fn build_message(&self, payload: &AlertPayload) -> Result<Message, AppError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(payload.subject.clone());
        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                payload.text_body.clone(),
                payload.html_body.clone(),
            ))
            .map_err(|e| AppError::internal(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn recipient(&self) -> String {
        self.recipients
            .iter()
            .map(|m| m.email.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn deliver(&self, payload: &AlertPayload) -> Result<Delivery, AppError> {
        let message = self.build_message(payload)?;

        match self.transport.send(message).await {
            Ok(response) => {
                debug!(host = %self.host, code = %response.code(), "SMTP accepted message");
                Ok(Delivery::Accepted)
            }
            // 5xx: the server understood and refused
            Err(e) if e.is_permanent() => Ok(Delivery::Rejected(e.to_string())),
            Err(e) => Err(AppError::delivery(format!("SMTP {}: {}", self.host, e))),
        }
    }
}
