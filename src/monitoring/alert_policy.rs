//! Alert decision policy
//!
//! `AlertPolicy::decide` is a pure function of the event, the post-cleanup
//! counters, the configuration and the stream's `AlertRecord`. Only the
//! monitor mutates the record, and only after a confirmed delivery.

use crate::event::{Event, EventType, LogCategory};
use crate::monitoring::counter_store::window_start;
use crate::monitoring::CounterStore;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Reason code that bypasses cooldown and thresholds
pub const MISSING_AUTH_HEADER: &str = "missing_auth_header";

/// Alerting thresholds and rate limits
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled_categories: HashSet<LogCategory>,
    /// Per client IP unauthorized attempts
    pub unauthorized_access_threshold: u32,
    /// Per path rate limit violations
    pub rate_limit_threshold: u32,
    /// Recent errors, or errors in a single module
    pub error_threshold: u32,
    pub cooldown: Duration,
    /// Rolling window for all counters
    pub time_window: Duration,
    /// Window for the recent error burst count
    pub error_time_window: Duration,
    pub max_alerts_per_day: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled_categories: LogCategory::ALL.into_iter().collect(),
            unauthorized_access_threshold: 5,
            rate_limit_threshold: 10,
            error_threshold: 5,
            cooldown: Duration::minutes(15),
            time_window: Duration::minutes(60),
            error_time_window: Duration::minutes(5),
            max_alerts_per_day: 50,
        }
    }
}

impl AlertConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled_categories(
        mut self,
        categories: impl IntoIterator<Item = LogCategory>,
    ) -> Self {
        self.enabled_categories = categories.into_iter().collect();
        self
    }

    pub fn with_unauthorized_access_threshold(mut self, threshold: u32) -> Self {
        self.unauthorized_access_threshold = threshold;
        self
    }

    pub fn with_rate_limit_threshold(mut self, threshold: u32) -> Self {
        self.rate_limit_threshold = threshold;
        self
    }

    pub fn with_error_threshold(mut self, threshold: u32) -> Self {
        self.error_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_time_window(mut self, window: Duration) -> Self {
        self.time_window = window;
        self
    }

    pub fn with_error_time_window(mut self, window: Duration) -> Self {
        self.error_time_window = window;
        self
    }

    pub fn with_max_alerts_per_day(mut self, max: u32) -> Self {
        self.max_alerts_per_day = max;
        self
    }

    pub fn is_enabled(&self, category: LogCategory) -> bool {
        self.enabled_categories.contains(&category)
    }
}

/// Bookkeeping for one alert stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertRecord {
    pub last_alert_time: Option<NaiveDateTime>,
    pub alerts_sent_today: u32,
    /// Next UTC midnight; the daily counter resets when `now` reaches it
    pub daily_reset_at: NaiveDateTime,
}

impl AlertRecord {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            last_alert_time: None,
            alerts_sent_today: 0,
            daily_reset_at: next_midnight(now),
        }
    }

    /// Reset the daily counter if the boundary has passed
    ///
    /// Returns true when a reset happened. The boundary moves to the midnight
    /// after `now`, so a reset happens at most once per day.
    pub fn roll_over(&mut self, now: NaiveDateTime) -> bool {
        if now < self.daily_reset_at {
            return false;
        }
        self.alerts_sent_today = 0;
        self.daily_reset_at = next_midnight(now);
        true
    }

    /// Alerts counted against today's cap as of `now`
    pub fn sent_today(&self, now: NaiveDateTime) -> u32 {
        if now >= self.daily_reset_at {
            0
        } else {
            self.alerts_sent_today
        }
    }

    /// Record a confirmed delivery
    pub fn mark_sent(&mut self, now: NaiveDateTime) {
        self.roll_over(now);
        self.last_alert_time = Some(now);
        self.alerts_sent_today += 1;
    }

    fn in_cooldown(&self, now: NaiveDateTime, cooldown: Duration) -> bool {
        self.last_alert_time
            .is_some_and(|last| now - last < cooldown)
    }
}

fn next_midnight(now: NaiveDateTime) -> NaiveDateTime {
    let midnight = now.date().and_time(chrono::NaiveTime::MIN);
    midnight + Duration::days(1)
}

/// Policy rule that produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRule {
    CategoryDisabled,
    Cooldown,
    DailyCap,
    UnauthorizedAccessThreshold,
    RateLimitThreshold,
    ErrorBurst,
    ModuleErrorThreshold,
    /// Credential probing is always surfaced, even inside a cooldown
    MissingAuthHeaderOverride,
    BelowThreshold,
}

impl AlertRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRule::CategoryDisabled => "category_disabled",
            AlertRule::Cooldown => "cooldown",
            AlertRule::DailyCap => "daily_cap",
            AlertRule::UnauthorizedAccessThreshold => "unauthorized_access_threshold",
            AlertRule::RateLimitThreshold => "rate_limit_threshold",
            AlertRule::ErrorBurst => "error_burst",
            AlertRule::ModuleErrorThreshold => "module_error_threshold",
            AlertRule::MissingAuthHeaderOverride => "missing_auth_header_override",
            AlertRule::BelowThreshold => "below_threshold",
        }
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    pub fire: bool,
    pub rule: AlertRule,
    /// Counter value the rule compared, when a threshold was involved
    pub observed: Option<u32>,
    pub threshold: Option<u32>,
}

impl AlertDecision {
    fn suppress(rule: AlertRule) -> Self {
        Self {
            fire: false,
            rule,
            observed: None,
            threshold: None,
        }
    }

    fn fire(rule: AlertRule, observed: Option<u32>, threshold: Option<u32>) -> Self {
        Self {
            fire: true,
            rule,
            observed,
            threshold,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertPolicy;

impl AlertPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether `event` should produce an alert
    pub fn decide(
        &self,
        event: &Event,
        counters: &CounterStore,
        config: &AlertConfig,
        record: &AlertRecord,
        now: NaiveDateTime,
    ) -> AlertDecision {
        // 1. Category gate
        if !config.is_enabled(event.log_category) {
            return AlertDecision::suppress(AlertRule::CategoryDisabled);
        }

        // 2. Override or cooldown, then thresholds
        let candidate = if self.is_override(event, config) {
            AlertDecision::fire(AlertRule::MissingAuthHeaderOverride, None, None)
        } else if record.in_cooldown(now, config.cooldown) {
            return AlertDecision::suppress(AlertRule::Cooldown);
        } else {
            match self.check_threshold(event, counters, config, now) {
                Some(decision) => decision,
                None => return AlertDecision::suppress(AlertRule::BelowThreshold),
            }
        };

        // 3. Hard daily cap applies to every rule
        if record.sent_today(now) >= config.max_alerts_per_day {
            debug!(
                rule = %candidate.rule,
                sent_today = record.sent_today(now),
                "Daily alert cap reached"
            );
            return AlertDecision {
                fire: false,
                rule: AlertRule::DailyCap,
                ..candidate
            };
        }

        candidate
    }

    fn is_override(&self, event: &Event, config: &AlertConfig) -> bool {
        event.log_category == LogCategory::Security
            && config.is_enabled(LogCategory::Security)
            && event.has_reason(MISSING_AUTH_HEADER)
    }

    fn check_threshold(
        &self,
        event: &Event,
        counters: &CounterStore,
        config: &AlertConfig,
        now: NaiveDateTime,
    ) -> Option<AlertDecision> {
        match event.event_type {
            EventType::UnauthorizedAccess => {
                let count = counters.ip_failures(event.client_ip_or_unknown());
                let threshold = config.unauthorized_access_threshold;
                (count >= threshold).then(|| {
                    AlertDecision::fire(
                        AlertRule::UnauthorizedAccessThreshold,
                        Some(count),
                        Some(threshold),
                    )
                })
            }
            EventType::RateLimitViolation => {
                let count = counters.rate_limit_violations(event.path_or_unknown());
                let threshold = config.rate_limit_threshold;
                (count >= threshold).then(|| {
                    AlertDecision::fire(AlertRule::RateLimitThreshold, Some(count), Some(threshold))
                })
            }
            EventType::Error => {
                let threshold = config.error_threshold;
                let since = window_start(now, config.error_time_window);
                let recent = counters.recent_error_count(since);
                if recent >= threshold {
                    return Some(AlertDecision::fire(
                        AlertRule::ErrorBurst,
                        Some(recent),
                        Some(threshold),
                    ));
                }
                counters
                    .busiest_module()
                    .filter(|(_, count)| *count >= threshold)
                    .map(|(_, count)| {
                        AlertDecision::fire(
                            AlertRule::ModuleErrorThreshold,
                            Some(count),
                            Some(threshold),
                        )
                    })
            }
            EventType::Other => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::Map;

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn event(event_type: EventType, category: LogCategory, minutes: i64) -> Event {
        Event {
            timestamp: base() + Duration::minutes(minutes),
            event_type,
            log_category: category,
            client_ip: Some("10.0.0.1".to_string()),
            path: Some("/api/agents".to_string()),
            module: Some("agents".to_string()),
            message: "test".to_string(),
            reason: None,
            line_number: None,
            fingerprint: format!("fp-{}", minutes),
            raw: Map::new(),
        }
    }

    fn store_with(events: &[Event]) -> CounterStore {
        let mut store = CounterStore::new(Duration::minutes(60));
        for e in events {
            store.record(e.clone());
        }
        store
    }

    fn config() -> AlertConfig {
        AlertConfig::new()
            .with_unauthorized_access_threshold(3)
            .with_rate_limit_threshold(2)
            .with_error_threshold(3)
            .with_cooldown(Duration::minutes(5))
    }

    #[test]
    fn should_not_fire_below_threshold() {
        // Arrange
        let events: Vec<Event> = (0..2)
            .map(|i| event(EventType::UnauthorizedAccess, LogCategory::Security, i))
            .collect();
        let store = store_with(&events);
        let record = AlertRecord::new(base());

        // Act
        let decision = AlertPolicy::new().decide(&events[1], &store, &config(), &record, base());

        // Assert
        assert!(!decision.fire);
        assert_eq!(decision.rule, AlertRule::BelowThreshold);
    }

    #[test]
    fn should_fire_at_threshold() {
        // Arrange
        let events: Vec<Event> = (0..3)
            .map(|i| event(EventType::UnauthorizedAccess, LogCategory::Security, i))
            .collect();
        let store = store_with(&events);
        let record = AlertRecord::new(base());

        // Act
        let decision = AlertPolicy::new().decide(&events[2], &store, &config(), &record, base());

        // Assert
        assert!(decision.fire);
        assert_eq!(decision.rule, AlertRule::UnauthorizedAccessThreshold);
        assert_eq!(decision.observed, Some(3));
        assert_eq!(decision.threshold, Some(3));
    }

    #[test]
    fn should_suppress_disabled_category() {
        // Arrange
        let events: Vec<Event> = (0..3)
            .map(|i| event(EventType::RateLimitViolation, LogCategory::RateLimit, i))
            .collect();
        let store = store_with(&events);
        let cfg = config().with_enabled_categories([LogCategory::Security]);

        // Act
        let decision =
            AlertPolicy::new().decide(&events[2], &store, &cfg, &AlertRecord::new(base()), base());

        // Assert
        assert!(!decision.fire);
        assert_eq!(decision.rule, AlertRule::CategoryDisabled);
    }

    #[test]
    fn should_suppress_inside_cooldown() {
        // Arrange
        let events: Vec<Event> = (0..3)
            .map(|i| event(EventType::RateLimitViolation, LogCategory::RateLimit, i))
            .collect();
        let store = store_with(&events);
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());

        // Act
        let inside = AlertPolicy::new().decide(
            &events[2],
            &store,
            &config(),
            &record,
            base() + Duration::minutes(4),
        );
        let after = AlertPolicy::new().decide(
            &events[2],
            &store,
            &config(),
            &record,
            base() + Duration::minutes(5),
        );

        // Assert
        assert_eq!(inside.rule, AlertRule::Cooldown);
        assert!(!inside.fire);
        assert!(after.fire);
        assert_eq!(after.rule, AlertRule::RateLimitThreshold);
    }

    #[test]
    fn should_enforce_daily_cap() {
        // Arrange
        let events: Vec<Event> = (0..3)
            .map(|i| event(EventType::UnauthorizedAccess, LogCategory::Security, i))
            .collect();
        let store = store_with(&events);
        let cfg = config()
            .with_max_alerts_per_day(1)
            .with_cooldown(Duration::zero());
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());

        // Act
        let decision = AlertPolicy::new().decide(&events[2], &store, &cfg, &record, base());

        // Assert
        assert!(!decision.fire);
        assert_eq!(decision.rule, AlertRule::DailyCap);
    }

    #[test]
    fn should_let_missing_auth_header_bypass_cooldown() {
        // Arrange
        let mut missing_header = event(EventType::UnauthorizedAccess, LogCategory::Security, 0);
        missing_header.reason = Some(MISSING_AUTH_HEADER.to_string());
        let store = store_with(&[missing_header.clone()]);
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());

        // Act
        let decision = AlertPolicy::new().decide(&missing_header, &store, &config(), &record, base());

        // Assert
        assert!(decision.fire);
        assert_eq!(decision.rule, AlertRule::MissingAuthHeaderOverride);
    }

    #[test]
    fn should_apply_daily_cap_to_override() {
        // Arrange
        let mut missing_header = event(EventType::UnauthorizedAccess, LogCategory::Security, 0);
        missing_header.reason = Some(MISSING_AUTH_HEADER.to_string());
        let store = store_with(&[missing_header.clone()]);
        let cfg = config().with_max_alerts_per_day(1);
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());

        // Act
        let decision = AlertPolicy::new().decide(&missing_header, &store, &cfg, &record, base());

        // Assert
        assert!(!decision.fire);
        assert_eq!(decision.rule, AlertRule::DailyCap);
    }

    #[test]
    fn should_fire_on_error_burst() {
        // Arrange
        let mut events = Vec::new();
        for (i, module) in ["a", "b", "c"].iter().enumerate() {
            let mut e = event(EventType::Error, LogCategory::Error, i as i64);
            e.module = Some(module.to_string());
            events.push(e);
        }
        let store = store_with(&events);
        let now = base() + Duration::minutes(3);

        // Act
        let decision = AlertPolicy::new().decide(
            &events[2],
            &store,
            &config(),
            &AlertRecord::new(base()),
            now,
        );

        // Assert
        assert!(decision.fire);
        assert_eq!(decision.rule, AlertRule::ErrorBurst);
        assert_eq!(decision.observed, Some(3));
    }

    #[test]
    fn should_fire_on_module_errors_outside_burst_window() {
        // Arrange
        let events: Vec<Event> = [0, 10, 20]
            .iter()
            .map(|m| event(EventType::Error, LogCategory::Error, *m))
            .collect();
        let store = store_with(&events);
        let now = base() + Duration::minutes(30);

        // Act
        let decision = AlertPolicy::new().decide(
            &events[2],
            &store,
            &config(),
            &AlertRecord::new(base()),
            now,
        );

        // Assert
        assert!(decision.fire);
        assert_eq!(decision.rule, AlertRule::ModuleErrorThreshold);
    }

    #[test]
    fn should_reset_daily_counter_once_per_day() {
        // Arrange
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());
        record.mark_sent(base());
        let next_day = base() + Duration::hours(13);

        // Act
        let first = record.roll_over(next_day);
        record.mark_sent(next_day);
        let second = record.roll_over(next_day + Duration::hours(1));

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(record.alerts_sent_today, 1);
        assert_eq!(
            record.daily_reset_at,
            NaiveDate::from_ymd_opt(2026, 2, 2)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn should_report_zero_sent_after_boundary_without_mutation() {
        // Arrange
        let mut record = AlertRecord::new(base());
        record.mark_sent(base());

        // Act & Assert
        assert_eq!(record.sent_today(base()), 1);
        assert_eq!(record.sent_today(base() + Duration::days(1)), 0);
        assert_eq!(record.alerts_sent_today, 1);
    }
}
