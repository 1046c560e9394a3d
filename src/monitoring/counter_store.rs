//! Rolling per-key counters over a sliding time window
//!
//! Counters are a cache of `historical_events`: `cleanup` drops expired
//! events and rebuilds every counter from what survives, so a counter always
//! equals the number of retained events for its key.

use crate::event::{Event, EventType};
use chrono::{Duration, NaiveDateTime};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CounterStore {
    time_window: Duration,
    historical_events: VecDeque<Event>,
    /// Unauthorized access attempts per client IP
    ip_failure_counts: HashMap<String, u32>,
    /// Unauthorized and rate limited requests per path
    endpoint_attempts: HashMap<String, u32>,
    rate_limit_violations: HashMap<String, u32>,
    module_error_counts: HashMap<String, u32>,
}

impl CounterStore {
    pub fn new(time_window: Duration) -> Self {
        Self {
            time_window,
            historical_events: VecDeque::new(),
            ip_failure_counts: HashMap::new(),
            endpoint_attempts: HashMap::new(),
            rate_limit_violations: HashMap::new(),
            module_error_counts: HashMap::new(),
        }
    }

    /// Append an event and bump its counters
    pub fn record(&mut self, event: Event) {
        self.count(&event);
        self.historical_events.push_back(event);
    }

    /// Drop events older than `now - time_window` and rebuild the counters
    ///
    /// Returns the number of evicted events. Counters are only rebuilt when
    /// something was evicted; `record` keeps them current otherwise.
    pub fn cleanup(&mut self, now: NaiveDateTime) -> usize {
        let cutoff = window_start(now, self.time_window);
        let before = self.historical_events.len();
        self.historical_events.retain(|e| e.timestamp >= cutoff);
        let evicted = before - self.historical_events.len();
        if evicted == 0 {
            return 0;
        }

        self.ip_failure_counts.clear();
        self.endpoint_attempts.clear();
        self.rate_limit_violations.clear();
        self.module_error_counts.clear();

        let events = std::mem::take(&mut self.historical_events);
        for event in &events {
            self.count(event);
        }
        self.historical_events = events;

        debug!(
            evicted = evicted,
            retained = self.historical_events.len(),
            "Evicted events outside time window"
        );
        evicted
    }

    fn count(&mut self, event: &Event) {
        match event.event_type {
            EventType::UnauthorizedAccess => {
                bump(&mut self.ip_failure_counts, event.client_ip_or_unknown());
                bump(&mut self.endpoint_attempts, event.path_or_unknown());
            }
            EventType::RateLimitViolation => {
                bump(&mut self.rate_limit_violations, event.path_or_unknown());
                bump(&mut self.endpoint_attempts, event.path_or_unknown());
            }
            EventType::Error => {
                bump(&mut self.module_error_counts, event.module_or_unknown());
            }
            EventType::Other => {}
        }
    }

    pub fn ip_failures(&self, client_ip: &str) -> u32 {
        self.ip_failure_counts.get(client_ip).copied().unwrap_or(0)
    }

    pub fn endpoint_attempts(&self, path: &str) -> u32 {
        self.endpoint_attempts.get(path).copied().unwrap_or(0)
    }

    pub fn rate_limit_violations(&self, path: &str) -> u32 {
        self.rate_limit_violations.get(path).copied().unwrap_or(0)
    }

    pub fn module_errors(&self, module: &str) -> u32 {
        self.module_error_counts.get(module).copied().unwrap_or(0)
    }

    /// Highest per-module error count, with its module
    pub fn busiest_module(&self) -> Option<(&str, u32)> {
        self.module_error_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(module, count)| (module.as_str(), *count))
    }

    /// Error events at or after `since`
    pub fn recent_error_count(&self, since: NaiveDateTime) -> u32 {
        self.historical_events
            .iter()
            .filter(|e| e.event_type == EventType::Error && e.timestamp >= since)
            .count() as u32
    }

    pub fn historical_events(&self) -> impl Iterator<Item = &Event> {
        self.historical_events.iter()
    }

    pub fn len(&self) -> usize {
        self.historical_events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.historical_events.is_empty()
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }
}

/// `now - window`, saturating at the earliest representable time
pub fn window_start(now: NaiveDateTime, window: Duration) -> NaiveDateTime {
    now.checked_sub_signed(window).unwrap_or(NaiveDateTime::MIN)
}

fn bump(map: &mut HashMap<String, u32>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}
