use crate::event::LogCategory;
use crate::monitoring::AlertConfig;
use crate::notify::{RetryPolicy, WebhookStyle};
use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 분 단위 설정값의 상한 (30일)
const MAX_MINUTES: i64 = 30 * 24 * 60;

/// 폴링 주기 상한 (1일)
const MAX_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// SMTP 연결 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpTls {
    /// 587 포트, 평문 연결 후 STARTTLS
    #[default]
    StartTls,
    /// 465 포트, 처음부터 TLS
    Implicit,
}

impl FromStr for SmtpTls {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "starttls" => Ok(SmtpTls::StartTls),
            "implicit" | "tls" | "ssl" => Ok(SmtpTls::Implicit),
            other => Err(ConfigError::InvalidTlsMode(other.to_string())),
        }
    }
}

/// 이메일 채널 설정
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub recipients: Vec<String>,
    pub tls: SmtpTls,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("from", &self.from)
            .field("recipients", &self.recipients)
            .field("tls", &self.tls)
            .finish()
    }
}

/// 웹훅 채널 설정
#[derive(Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub style: WebhookStyle,
    pub url: String,
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("style", &self.style)
            .field("url", &"***")
            .finish()
    }
}

/// 모니터 설정
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub alert: AlertConfig,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    pub security_log: PathBuf,
    pub rate_limit_log: PathBuf,
    pub error_log: PathBuf,
    /// 설정이 불완전하면 None (이메일 채널 비활성화)
    pub smtp: Option<SmtpConfig>,
    pub webhooks: Vec<WebhookConfig>,
    pub retry: RetryPolicy,
}

impl MonitorConfig {
    /// 환경 변수에서 설정 로드
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 임의의 키-값 조회 함수에서 설정 로드
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 빈 문자열은 설정되지 않은 것으로 취급
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let enabled_categories = match get("MONITOR_ENABLED_CATEGORIES") {
            Some(list) => parse_categories(&list)?,
            None => LogCategory::ALL.into_iter().collect(),
        };

        let alert = AlertConfig::new()
            .with_enabled_categories(enabled_categories)
            .with_unauthorized_access_threshold(parse_or(
                &get,
                "MONITOR_UNAUTHORIZED_THRESHOLD",
                5,
            )?)
            .with_rate_limit_threshold(parse_or(&get, "MONITOR_RATE_LIMIT_THRESHOLD", 10)?)
            .with_error_threshold(parse_or(&get, "MONITOR_ERROR_THRESHOLD", 5)?)
            .with_cooldown(parse_minutes(&get, "MONITOR_COOLDOWN_MINUTES", 15, 0)?)
            .with_time_window(parse_minutes(&get, "MONITOR_TIME_WINDOW_MINUTES", 60, 1)?)
            .with_error_time_window(parse_minutes(&get, "MONITOR_ERROR_WINDOW_MINUTES", 5, 1)?)
            .with_max_alerts_per_day(parse_or(&get, "MONITOR_MAX_ALERTS_PER_DAY", 50)?);

        let poll_secs: u64 = parse_or(&get, "MONITOR_POLL_INTERVAL_SECS", 60)?;
        if !(1..=MAX_POLL_INTERVAL_SECS).contains(&poll_secs) {
            return Err(ConfigError::InvalidValue {
                key: "MONITOR_POLL_INTERVAL_SECS",
                value: poll_secs.to_string(),
            });
        }
        let poll_interval = Duration::from_secs(poll_secs);
        let stop_timeout = Duration::from_secs(parse_or(&get, "MONITOR_STOP_TIMEOUT_SECS", 30)?);

        let log_dir = PathBuf::from(get("MONITOR_LOG_DIR").unwrap_or_else(|| "logs".to_string()));
        let log_path = |key: &str, file: &str| {
            get(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| log_dir.join(file))
        };
        let security_log = log_path("MONITOR_SECURITY_LOG", "security.log");
        let rate_limit_log = log_path("MONITOR_RATE_LIMIT_LOG", "rate_limit.log");
        let error_log = log_path("MONITOR_ERROR_LOG", "error.log");

        let smtp = load_smtp(&get)?;

        let webhooks = [
            ("SLACK_WEBHOOK_URL", WebhookStyle::Slack),
            ("TEAMS_WEBHOOK_URL", WebhookStyle::Teams),
            ("DISCORD_WEBHOOK_URL", WebhookStyle::Discord),
        ]
        .into_iter()
        .filter_map(|(key, style)| get(key).map(|url| WebhookConfig { style, url }))
        .collect();

        let retry = RetryPolicy::default()
            .with_max_attempts(parse_or(&get, "NOTIFY_MAX_ATTEMPTS", 3)?)
            .with_initial_backoff(Duration::from_millis(parse_or(
                &get,
                "NOTIFY_INITIAL_BACKOFF_MS",
                1000,
            )?))
            .with_attempt_timeout(Duration::from_secs(parse_or(
                &get,
                "NOTIFY_ATTEMPT_TIMEOUT_SECS",
                10,
            )?));

        Ok(Self {
            alert,
            poll_interval,
            stop_timeout,
            security_log,
            rate_limit_log,
            error_log,
            smtp,
            webhooks,
            retry,
        })
    }

    /// 카테고리별 로그 파일 경로
    pub fn log_path(&self, category: LogCategory) -> &PathBuf {
        match category {
            LogCategory::Security => &self.security_log,
            LogCategory::RateLimit => &self.rate_limit_log,
            LogCategory::Error => &self.error_log,
        }
    }
}

fn parse_categories(list: &str) -> Result<HashSet<LogCategory>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| LogCategory::from_str(s).map_err(ConfigError::InvalidCategory))
        .collect()
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

/// `min..=MAX_MINUTES` 범위의 분 단위 기간
fn parse_minutes<G>(
    get: &G,
    key: &'static str,
    default: i64,
    min: i64,
) -> Result<chrono::Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let minutes: i64 = parse_or(get, key, default)?;
    if !(min..=MAX_MINUTES).contains(&minutes) {
        return Err(ConfigError::InvalidValue {
            key,
            value: minutes.to_string(),
        });
    }
    Ok(chrono::Duration::minutes(minutes))
}

/// SMTP 설정이 빠져 있으면 경고 후 None
fn load_smtp<G>(get: &G) -> Result<Option<SmtpConfig>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let required = [
        "SMTP_HOST",
        "SMTP_USERNAME",
        "SMTP_PASSWORD",
        "SMTP_FROM",
        "ALERT_RECIPIENTS",
    ];
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| get(*key).is_none())
        .collect();

    if !missing.is_empty() {
        tracing::warn!(
            missing = ?missing,
            "SMTP 설정이 불완전합니다. 이메일 알림이 비활성화됩니다."
        );
        return Ok(None);
    }

    let recipients: Vec<String> = get("ALERT_RECIPIENTS")
        .unwrap_or_default()
        .split(',')
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if recipients.is_empty() {
        tracing::warn!("ALERT_RECIPIENTS에 유효한 주소가 없습니다. 이메일 알림이 비활성화됩니다.");
        return Ok(None);
    }

    Ok(Some(SmtpConfig {
        host: get("SMTP_HOST").unwrap_or_default(),
        port: parse_or(get, "SMTP_PORT", 587)?,
        username: get("SMTP_USERNAME").unwrap_or_default(),
        password: get("SMTP_PASSWORD").unwrap_or_default(),
        from: get("SMTP_FROM").unwrap_or_default(),
        recipients,
        tls: match get("SMTP_TLS") {
            Some(mode) => mode.parse()?,
            None => SmtpTls::default(),
        },
    }))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0}")]
    InvalidCategory(String),
    #[error("Invalid SMTP_TLS mode '{0}': expected 'starttls' or 'implicit'")]
    InvalidTlsMode(String),
}
