//! Event structure and classification for the log monitor

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Kind of incident a log line describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UnauthorizedAccess,
    RateLimitViolation,
    Error,
    #[default]
    Other,
}

impl EventType {
    /// Classify from the `event_type` and `level` fields of a log line
    pub fn classify(event_type: Option<&str>, level: Option<&str>) -> Self {
        match event_type.map(|t| t.trim().to_lowercase()).as_deref() {
            Some("unauthorized_access") | Some("unauthorized") | Some("auth_failure") => {
                EventType::UnauthorizedAccess
            }
            Some("rate_limit_violation") | Some("rate_limit_exceeded") => {
                EventType::RateLimitViolation
            }
            _ if level.is_some_and(|l| l.eq_ignore_ascii_case("ERROR")) => EventType::Error,
            _ => EventType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UnauthorizedAccess => "unauthorized_access",
            EventType::RateLimitViolation => "rate_limit_violation",
            EventType::Error => "error",
            EventType::Other => "other",
        }
    }

    /// Human readable label for alert subjects
    pub fn title(&self) -> &'static str {
        match self {
            EventType::UnauthorizedAccess => "Unauthorized Access",
            EventType::RateLimitViolation => "Rate Limit Violation",
            EventType::Error => "Error",
            EventType::Other => "Other",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log file family an event was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    Security,
    RateLimit,
    Error,
}

impl LogCategory {
    pub const ALL: [LogCategory; 3] = [
        LogCategory::Security,
        LogCategory::RateLimit,
        LogCategory::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Security => "security",
            LogCategory::RateLimit => "rate_limit",
            LogCategory::Error => "error",
        }
    }

    /// Human readable label for alert subjects
    pub fn title(&self) -> &'static str {
        match self {
            LogCategory::Security => "Security",
            LogCategory::RateLimit => "Rate Limit",
            LogCategory::Error => "Error",
        }
    }

    /// Whether a line of this shape belongs in a file of this category
    ///
    /// Error files only carry `level == ERROR` lines; security and rate limit
    /// files only carry their own event type.
    pub fn accepts(&self, event_type: EventType, level: Option<&str>) -> bool {
        match self {
            LogCategory::Security => event_type == EventType::UnauthorizedAccess,
            LogCategory::RateLimit => event_type == EventType::RateLimitViolation,
            LogCategory::Error => level.is_some_and(|l| l.eq_ignore_ascii_case("ERROR")),
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "security" => Ok(LogCategory::Security),
            "rate_limit" | "ratelimit" | "rate-limit" => Ok(LogCategory::RateLimit),
            "error" | "errors" => Ok(LogCategory::Error),
            other => Err(format!(
                "invalid log category '{}': expected 'security', 'rate_limit', or 'error'",
                other
            )),
        }
    }
}

/// Well-known fields pulled out of a JSON log line
///
/// Lookups are lenient: a field with an unexpected JSON type is read as its
/// textual form instead of rejecting the whole line.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct LogFields {
    pub timestamp: Option<String>,
    pub level: Option<String>,
    pub event_type: Option<String>,
    pub message: Option<String>,
    pub client_ip: Option<String>,
    pub path: Option<String>,
    pub module: Option<String>,
    pub reason: Option<String>,
    pub line_number: Option<u64>,
}

impl LogFields {
    pub fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            timestamp: text_field(map, &["timestamp", "time", "asctime"]),
            level: text_field(map, &["level", "levelname"]),
            event_type: text_field(map, &["event_type"]),
            message: text_field(map, &["message", "msg"]),
            client_ip: text_field(map, &["client_ip", "ip", "remote_addr"]),
            path: text_field(map, &["path", "endpoint"]),
            module: text_field(map, &["module", "logger", "target"]),
            reason: text_field(map, &["reason"]),
            line_number: map
                .get("line_number")
                .or_else(|| map.get("lineno"))
                .and_then(|v| match v {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                }),
        }
    }
}

/// First present, non-null field among `keys`, rendered as text
fn text_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

/// One parsed log line
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Parsed timestamp, UTC without offset
    pub timestamp: NaiveDateTime,
    pub event_type: EventType,
    pub log_category: LogCategory,
    pub client_ip: Option<String>,
    pub path: Option<String>,
    pub module: Option<String>,
    pub message: String,
    /// Reason code, e.g. "missing_auth_header"
    pub reason: Option<String>,
    pub line_number: Option<u64>,
    /// Deduplication fingerprint of the source line
    pub fingerprint: String,
    /// The whole JSON object as read from the file
    pub raw: Map<String, Value>,
}

impl Event {
    /// Client IP, or "unknown" when the line did not carry one
    pub fn client_ip_or_unknown(&self) -> &str {
        self.client_ip.as_deref().unwrap_or("unknown")
    }

    pub fn path_or_unknown(&self) -> &str {
        self.path.as_deref().unwrap_or("unknown")
    }

    pub fn module_or_unknown(&self) -> &str {
        self.module.as_deref().unwrap_or("unknown")
    }

    pub fn has_reason(&self, reason: &str) -> bool {
        self.reason.as_deref() == Some(reason)
    }
}
