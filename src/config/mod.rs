pub mod app_config;

pub use app_config::{ConfigError, MonitorConfig, SmtpConfig, SmtpTls, WebhookConfig};
