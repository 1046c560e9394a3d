//! Alert payload composition
//!
//! Turns an event plus the aggregate context around it into a subject, a
//! plain text body and an HTML body. Missing values render as "N/A".

use crate::event::Event;
use crate::monitoring::{AlertConfig, AlertDecision, CounterStore};
use crate::notify::AlertPayload;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt::Write;

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Default)]
pub struct AlertComposer;

impl AlertComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        event: &Event,
        decision: &AlertDecision,
        counters: &CounterStore,
        config: &AlertConfig,
        created_at: DateTime<Utc>,
    ) -> AlertPayload {
        let subject = format!(
            "{} Alert: {}",
            event.log_category.title(),
            event.event_type.title()
        );
        let facts = self.facts(event, decision, counters, config);
        let context = self.context(event, decision, counters, config);

        let text_body = render_text(&subject, &facts, &context);
        let html_body = render_html(&subject, &facts, &event.raw);

        AlertPayload {
            subject,
            text_body,
            html_body,
            category: event.log_category,
            event_type: event.event_type,
            rule: decision.rule,
            facts,
            context,
            created_at,
        }
    }

    fn facts(
        &self,
        event: &Event,
        decision: &AlertDecision,
        counters: &CounterStore,
        config: &AlertConfig,
    ) -> Vec<(String, String)> {
        let ratio = match (decision.observed, decision.threshold) {
            (Some(observed), Some(threshold)) if threshold > 0 => {
                Some(observed as f64 / threshold as f64 * 100.0)
            }
            _ => None,
        };

        vec![
            fact("Category", Some(event.log_category.title())),
            fact("Event Type", Some(event.event_type.as_str())),
            fact("Rule", Some(decision.rule.as_str())),
            fact(
                "Timestamp",
                Some(event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            ),
            fact("Client IP", event.client_ip.as_deref()),
            fact("Path", event.path.as_deref()),
            fact("Module", event.module.as_deref()),
            fact("Message", non_empty(&event.message)),
            fact("Reason", event.reason.as_deref()),
            fact("Observed", decision.observed.map(|v| v.to_string())),
            fact("Threshold", decision.threshold.map(|v| v.to_string())),
            fact("Threshold Ratio", ratio.map(|r| format!("{:.1}%", r))),
            fact(
                "IP Failures",
                event
                    .client_ip
                    .as_deref()
                    .map(|ip| counters.ip_failures(ip).to_string()),
            ),
            fact(
                "Endpoint Attempts",
                event
                    .path
                    .as_deref()
                    .map(|p| counters.endpoint_attempts(p).to_string()),
            ),
            fact(
                "Module Errors",
                event
                    .module
                    .as_deref()
                    .map(|m| counters.module_errors(m).to_string()),
            ),
            fact("Events In Window", Some(counters.len().to_string())),
            fact(
                "Window",
                Some(format!("{} min", config.time_window.num_minutes())),
            ),
        ]
    }

    fn context(
        &self,
        event: &Event,
        decision: &AlertDecision,
        counters: &CounterStore,
        config: &AlertConfig,
    ) -> Value {
        json!({
            "rule": decision.rule,
            "observed": decision.observed,
            "threshold": decision.threshold,
            "event": {
                "timestamp": event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                "event_type": event.event_type,
                "log_category": event.log_category,
                "fingerprint": event.fingerprint,
                "fields": event.raw,
            },
            "counters": {
                "events_in_window": counters.len(),
                "ip_failures": counters.ip_failures(event.client_ip_or_unknown()),
                "endpoint_attempts": counters.endpoint_attempts(event.path_or_unknown()),
                "rate_limit_violations": counters.rate_limit_violations(event.path_or_unknown()),
                "module_errors": counters.module_errors(event.module_or_unknown()),
            },
            "config": {
                "time_window_minutes": config.time_window.num_minutes(),
                "cooldown_minutes": config.cooldown.num_minutes(),
                "max_alerts_per_day": config.max_alerts_per_day,
            },
        })
    }
}

fn fact(name: &str, value: Option<impl Into<String>>) -> (String, String) {
    (
        name.to_string(),
        value
            .map(Into::into)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
    )
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.trim().is_empty()).then_some(s)
}

fn render_text(subject: &str, facts: &[(String, String)], context: &Value) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", subject);
    let _ = writeln!(out, "{}", "=".repeat(subject.len()));
    let _ = writeln!(out);
    for (name, value) in facts {
        let _ = writeln!(out, "{}: {}", name, value);
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Context:");
    let pretty = serde_json::to_string_pretty(&format_numbers(context))
        .unwrap_or_else(|_| context.to_string());
    out.push_str(&pretty);
    out.push('\n');
    out
}

fn render_html(subject: &str, facts: &[(String, String)], raw: &Map<String, Value>) -> String {
    let mut out = String::new();
    out.push_str("<html><body style=\"font-family: sans-serif;\">");
    let _ = write!(out, "<h2>{}</h2>", escape_html(subject));

    out.push_str("<div style=\"background:#f6f8fa;padding:12px;border-radius:4px;\">");
    for (name, value) in facts {
        let _ = write!(
            out,
            "<p style=\"margin:2px 0;\"><strong>{}:</strong> {}</p>",
            escape_html(name),
            escape_html(value)
        );
    }
    out.push_str("</div>");

    out.push_str("<h3>Log Fields</h3>");
    out.push_str("<table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">");
    out.push_str("<tr><th>Field</th><th>Value</th></tr>");
    // Map iterates in key order
    for (key, value) in raw {
        let _ = write!(
            out,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape_html(key),
            escape_html(&display_value(value))
        );
    }
    out.push_str("</table></body></html>");
    out
}

/// Render a JSON value for display; floats get one decimal
fn display_value(value: &Value) -> String {
    match value {
        Value::Null => NOT_AVAILABLE.to_string(),
        Value::String(s) if s.is_empty() => NOT_AVAILABLE.to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| format!("{:.1}", f))
            .unwrap_or_else(|| n.to_string()),
        other => format_numbers(other).to_string(),
    }
}

/// Round every float inside a JSON tree to one decimal
fn format_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| (f * 10.0).round() / 10.0)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(format_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), format_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
