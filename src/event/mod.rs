//! Event model for the log monitor
//!
//! - Event definition and classification
//! - Timestamp normalization
//! - Line fingerprints for deduplication

mod event_types;
pub mod fingerprint;
pub mod timestamp;

pub(crate) use event_types::LogFields;
pub use event_types::{Event, EventType, LogCategory};
pub use fingerprint::fingerprint;
pub use timestamp::parse_timestamp;
