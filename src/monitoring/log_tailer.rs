//! Incremental JSON-lines log tailer
//!
//! Reads one log file from the last byte offset on every poll:
//! - Detects rotation/truncation by a shrinking file size
//! - Parses each new line as a JSON object, skipping malformed lines
//! - Keeps only lines whose shape matches the file's category
//! - Drops lines already seen (fingerprint cache, oldest-first eviction)
//! - Keeps events inside the rolling window; lines with a bad timestamp are kept

use crate::event::{fingerprint, parse_timestamp, Event, EventType, LogCategory, LogFields};
use crate::utils::AppError;
use chrono::NaiveDateTime;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fingerprint cache size that triggers pruning
pub const DEFAULT_FINGERPRINT_CAP: usize = 1000;

/// Fingerprints kept after pruning (most recent)
pub const DEFAULT_FINGERPRINT_RETAIN: usize = 500;

/// Insertion-ordered set of line fingerprints
#[derive(Debug, Clone, Default)]
pub struct SeenFingerprints {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenFingerprints {
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.set.contains(fingerprint)
    }

    /// Returns false if the fingerprint was already present
    pub fn insert(&mut self, fingerprint: String) -> bool {
        if !self.set.insert(fingerprint.clone()) {
            return false;
        }
        self.order.push_back(fingerprint);
        true
    }

    /// Once over `cap`, keep only the `retain` most recent entries
    pub fn prune(&mut self, cap: usize, retain: usize) -> usize {
        if self.order.len() <= cap {
            return 0;
        }
        let mut removed = 0;
        while self.order.len() > retain {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Per-file tail position
#[derive(Debug, Clone)]
pub struct TailState {
    pub file_path: PathBuf,
    pub last_byte_offset: u64,
    pub last_file_size: u64,
    pub seen_fingerprints: SeenFingerprints,
}

impl TailState {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            last_byte_offset: 0,
            last_file_size: 0,
            seen_fingerprints: SeenFingerprints::default(),
        }
    }

    fn reset(&mut self) {
        self.last_byte_offset = 0;
        self.last_file_size = 0;
        self.seen_fingerprints.clear();
    }
}

/// Log tailer configuration
#[derive(Debug, Clone)]
pub struct LogTailerConfig {
    /// Category of the tailed file, decides which line shapes are accepted
    pub category: LogCategory,
    pub fingerprint_cap: usize,
    pub fingerprint_retain: usize,
}

impl LogTailerConfig {
    pub fn new(category: LogCategory) -> Self {
        Self {
            category,
            fingerprint_cap: DEFAULT_FINGERPRINT_CAP,
            fingerprint_retain: DEFAULT_FINGERPRINT_RETAIN,
        }
    }
}

/// Stateless tailer: position lives in [`TailState`], owned by the caller
#[derive(Debug, Clone)]
pub struct LogTailer {
    category: LogCategory,
    fingerprint_cap: usize,
    fingerprint_retain: usize,
}

impl LogTailer {
    pub fn new(category: LogCategory) -> Self {
        Self::with_config(LogTailerConfig::new(category))
    }

    pub fn with_config(config: LogTailerConfig) -> Self {
        Self {
            category: config.category,
            fingerprint_cap: config.fingerprint_cap,
            fingerprint_retain: config.fingerprint_retain.min(config.fingerprint_cap),
        }
    }

    pub fn category(&self) -> LogCategory {
        self.category
    }

    /// Read every complete line appended since the last poll
    ///
    /// `now` stamps events whose timestamp cannot be parsed. File access
    /// errors never escape: they are logged and reported as "no new events",
    /// and the next poll retries from the same offset.
    pub fn poll(
        &self,
        mut state: TailState,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> (Vec<Event>, TailState) {
        match self.read_new_events(&mut state, window_start, now) {
            Ok(events) => (events, state),
            Err(e) => {
                warn!(
                    error = %e,
                    file = %state.file_path.display(),
                    category = %self.category,
                    "Log file unreadable this tick, treating as no new events"
                );
                (Vec::new(), state)
            }
        }
    }

    fn read_new_events(
        &self,
        state: &mut TailState,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Result<Vec<Event>, AppError> {
        let current_size = match fs::metadata(&state.file_path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(file = %state.file_path.display(), "Log file does not exist yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::file_access(format!(
                    "{}: {}",
                    state.file_path.display(),
                    e
                )))
            }
        };

        if current_size == state.last_file_size {
            debug!(file = %state.file_path.display(), "No new bytes");
            return Ok(Vec::new());
        }

        if current_size < state.last_file_size {
            info!(
                file = %state.file_path.display(),
                previous_size = state.last_file_size,
                current_size = current_size,
                "Log file appears to have been rotated/truncated, reading from the start"
            );
            state.reset();
        }

        let (lines, end_offset) = read_lines_from(&state.file_path, state.last_byte_offset)?;

        let mut events = Vec::new();
        for line in lines {
            if let Some(event) = self.accept_line(&line, state, window_start, now) {
                events.push(event);
            }
        }

        let pruned = state
            .seen_fingerprints
            .prune(self.fingerprint_cap, self.fingerprint_retain);
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned fingerprint cache");
        }

        // An unfinished last line stays behind the offset until its newline arrives
        state.last_byte_offset = end_offset;
        state.last_file_size = current_size.max(end_offset);

        if !events.is_empty() {
            info!(
                count = events.len(),
                category = %self.category,
                file = %state.file_path.display(),
                "Read new log events"
            );
        }

        Ok(events)
    }

    /// Turn one raw line into an event, or `None` if it should be skipped
    fn accept_line(
        &self,
        line: &str,
        state: &mut TailState,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Option<Event> {
        if line.trim().is_empty() {
            return None;
        }

        let (event, timestamp_known) = match self.parse_line(line, now) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, category = %self.category, "Failed to parse log line, skipping");
                return None;
            }
        };

        if !state.seen_fingerprints.insert(event.fingerprint.clone()) {
            debug!(fingerprint = %event.fingerprint, "Skipping already processed line");
            return None;
        }

        // Fail-open: an unknown timestamp never hides an event
        if timestamp_known && event.timestamp < window_start {
            debug!(timestamp = %event.timestamp, "Skipping event outside time window");
            return None;
        }

        Some(event)
    }

    /// Parse a JSON log line for this tailer's category
    ///
    /// Returns:
    /// - Ok(Some((event, true))) for a line with a parsed timestamp
    /// - Ok(Some((event, false))) when the timestamp fell back to `now`
    /// - Ok(None) when the line has the wrong shape for this file
    /// - Err(LogParse) when the line is not a JSON object
    pub fn parse_line(
        &self,
        line: &str,
        now: NaiveDateTime,
    ) -> Result<Option<(Event, bool)>, AppError> {
        let value: Value =
            serde_json::from_str(line.trim()).map_err(|e| AppError::log_parse(e.to_string()))?;
        let raw = match value {
            Value::Object(map) => map,
            other => {
                return Err(AppError::log_parse(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let fields = LogFields::from_map(&raw);
        let event_type = EventType::classify(fields.event_type.as_deref(), fields.level.as_deref());
        if !self.category.accepts(event_type, fields.level.as_deref()) {
            debug!(
                category = %self.category,
                event_type = %event_type,
                "Line shape does not belong to this log, skipping"
            );
            return Ok(None);
        }

        let fingerprint = fingerprint(
            &raw,
            fields.timestamp.as_deref(),
            fields.message.as_deref(),
            fields.module.as_deref(),
            fields.line_number,
        );

        let parsed = match fields.timestamp.as_deref() {
            Some(ts) => parse_timestamp(ts),
            None => Err(AppError::timestamp_parse("missing timestamp field")),
        };
        let (timestamp, timestamp_known) = match parsed {
            Ok(ts) => (ts, true),
            Err(e) => {
                warn!(
                    error = %e,
                    fingerprint = %fingerprint,
                    "Unparseable timestamp, keeping event with current time"
                );
                (now, false)
            }
        };

        Ok(Some((
            Event {
                timestamp,
                event_type,
                log_category: self.category,
                client_ip: fields.client_ip,
                path: fields.path,
                module: fields.module,
                message: fields.message.unwrap_or_default(),
                reason: fields.reason,
                line_number: fields.line_number,
                fingerprint,
                raw,
            },
            timestamp_known,
        )))
    }
}

/// Read newline-terminated lines from `offset`
///
/// Returns the lines (lossy UTF-8) and the offset just past the last
/// newline. A trailing fragment without a newline is left unread.
fn read_lines_from(path: &Path, offset: u64) -> Result<(Vec<String>, u64), AppError> {
    let mut file = File::open(path)
        .map_err(|e| AppError::file_access(format!("{}: {}", path.display(), e)))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| AppError::file_access(format!("{}: seek failed: {}", path.display(), e)))?;

    let mut reader = BufReader::new(file);
    let mut lines = Vec::new();
    let mut position = offset;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| AppError::file_access(format!("{}: read failed: {}", path.display(), e)))?;
        if read == 0 || buf.last() != Some(&b'\n') {
            break;
        }
        position += read as u64;
        lines.push(String::from_utf8_lossy(&buf).into_owned());
    }

    Ok((lines, position))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
