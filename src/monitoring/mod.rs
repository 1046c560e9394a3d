//! Log monitoring pipeline
//!
//! - Incremental tailing with rotation detection and line deduplication
//! - Rolling window counters
//! - Alert policy (thresholds, cooldown, daily cap, overrides)
//! - Alert composition
//! - The monitor orchestrator that ties them together

pub mod alert_policy;
pub mod composer;
pub mod counter_store;
pub mod log_tailer;
pub mod monitor;

pub use alert_policy::{
    AlertConfig, AlertDecision, AlertPolicy, AlertRecord, AlertRule, MISSING_AUTH_HEADER,
};
pub use composer::AlertComposer;
pub use counter_store::CounterStore;
pub use log_tailer::{LogTailer, LogTailerConfig, SeenFingerprints, TailState};
pub use monitor::{CycleReport, Monitor, MonitorCore};
