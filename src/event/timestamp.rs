//! Timestamp normalization for heterogeneous log formats
//!
//! Accepted inputs, tried in order:
//! 1. `2026-01-31 14:50:00,123` (comma milliseconds, the house log format)
//! 2. ISO-8601 with a trailing `Z`
//! 3. ISO-8601 with a space instead of `T`
//! 4. Plain ISO-8601 / RFC 3339, with or without offset
//!
//! The result is always a naive UTC datetime; offsets are converted, then dropped.

use crate::utils::AppError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

const NAIVE_T: &str = "%Y-%m-%dT%H:%M:%S%.f";
const NAIVE_SPACE: &str = "%Y-%m-%d %H:%M:%S%.f";
const OFFSET_SPACE: &str = "%Y-%m-%d %H:%M:%S%.f%:z";

/// Parse a timestamp string into naive UTC
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, AppError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(AppError::timestamp_parse("empty timestamp"));
    }

    parse_comma_millis(s)
        .or_else(|| parse_zulu(s))
        .or_else(|| parse_space_separated(s))
        .or_else(|| parse_iso(s))
        .ok_or_else(|| AppError::timestamp_parse(format!("no known format matches '{}'", s)))
}

/// `%Y-%m-%d %H:%M:%S,%f`
fn parse_comma_millis(s: &str) -> Option<NaiveDateTime> {
    let (head, fraction) = s.split_once(',')?;
    if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(&format!("{}.{}", head, fraction), NAIVE_SPACE).ok()
}

fn parse_zulu(s: &str) -> Option<NaiveDateTime> {
    let naive = s.strip_suffix('Z').or_else(|| s.strip_suffix('z'))?;
    NaiveDateTime::parse_from_str(naive, NAIVE_T)
        .or_else(|_| NaiveDateTime::parse_from_str(naive, NAIVE_SPACE))
        .ok()
}

fn parse_space_separated(s: &str) -> Option<NaiveDateTime> {
    if !s.contains(' ') {
        return None;
    }
    NaiveDateTime::parse_from_str(s, NAIVE_SPACE)
        .ok()
        .or_else(|| {
            DateTime::parse_from_str(s, OFFSET_SPACE)
                .ok()
                .map(|dt| dt.naive_utc())
        })
}

fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, NAIVE_T).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
