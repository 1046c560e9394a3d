//! Monitor orchestrator
//!
//! One `Monitor` owns every piece of mutable state for a set of log files:
//! tail positions, the counter store and per-category alert records.
//! Each tick runs one cycle:
//!
//! cleanup → tail → record → decide → compose → notify → mark sent
//!
//! Pre-existing backlog on the very first cycle only seeds the counters.

use crate::event::{Event, LogCategory};
use crate::monitoring::counter_store::window_start;
use crate::monitoring::{
    AlertComposer, AlertConfig, AlertPolicy, AlertRecord, AlertRule, CounterStore, LogTailer,
    TailState,
};
use crate::notify::{AlertPayload, Notifier};
use crate::utils::AppError;
use chrono::{NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Counts for one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub events_read: usize,
    pub alerts_fired: usize,
    pub alerts_delivered: usize,
    /// Threshold met but blocked by cooldown, daily cap or a disabled category
    pub alerts_suppressed: usize,
    pub alerts_undelivered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Delivered,
    Failed,
    Cancelled,
}

struct Source {
    tailer: LogTailer,
    state: TailState,
}

/// State and pipeline for one monitor, moved into the poll task while running
pub struct MonitorCore {
    name: String,
    sources: Vec<Source>,
    counters: CounterStore,
    records: HashMap<LogCategory, AlertRecord>,
    config: AlertConfig,
    policy: AlertPolicy,
    composer: AlertComposer,
    notifier: Arc<dyn Notifier>,
    first_run: bool,
    shutdown: watch::Receiver<bool>,
}

impl MonitorCore {
    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn alert_record(&self, category: LogCategory) -> Option<&AlertRecord> {
        self.records.get(&category)
    }

    pub fn tail_state(&self, category: LogCategory) -> Option<&TailState> {
        self.sources
            .iter()
            .find(|s| s.tailer.category() == category)
            .map(|s| &s.state)
    }

    pub fn is_first_run(&self) -> bool {
        self.first_run
    }

    /// Run one poll cycle at wall time `now`
    #[instrument(skip(self), fields(monitor = %self.name))]
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> CycleReport {
        let mut report = CycleReport::default();
        let cutoff = window_start(now, self.config.time_window);

        for (category, record) in self.records.iter_mut() {
            if record.roll_over(now) {
                info!(category = %category, "Daily alert counter reset");
            }
        }

        // Tailed events are never older than `cutoff`, so one eviction per cycle suffices
        self.counters.cleanup(now);

        for idx in 0..self.sources.len() {
            let events = self.poll_source(idx, cutoff, now).await;
            report.events_read += events.len();

            for event in events {
                if self.first_run {
                    self.counters.record(event);
                    continue;
                }
                self.counters.record(event.clone());
                self.evaluate(&event, now, &mut report).await;
            }
        }

        if self.first_run {
            info!(
                events = report.events_read,
                retained = self.counters.len(),
                "Initial scan complete, backlog recorded without alerting"
            );
            self.first_run = false;
        }

        report
    }

    async fn evaluate(&mut self, event: &Event, now: NaiveDateTime, report: &mut CycleReport) {
        let record = self
            .records
            .entry(event.log_category)
            .or_insert_with(|| AlertRecord::new(now));
        let decision = self
            .policy
            .decide(event, &self.counters, &self.config, record, now);

        if !decision.fire {
            if decision.rule != AlertRule::BelowThreshold {
                report.alerts_suppressed += 1;
                info!(
                    category = %event.log_category,
                    event_type = %event.event_type,
                    rule = %decision.rule,
                    "Alert suppressed"
                );
            }
            return;
        }

        report.alerts_fired += 1;
        info!(
            category = %event.log_category,
            event_type = %event.event_type,
            rule = %decision.rule,
            observed = ?decision.observed,
            threshold = ?decision.threshold,
            "Alert triggered"
        );

        let payload = self.composer.compose(
            event,
            &decision,
            &self.counters,
            &self.config,
            Utc::now(),
        );

        match dispatch(self.notifier.as_ref(), &self.shutdown, &payload).await {
            Dispatch::Delivered => {
                record.mark_sent(now);
                report.alerts_delivered += 1;
            }
            Dispatch::Failed => {
                report.alerts_undelivered += 1;
                error!(subject = %payload.subject, "Alert not delivered");
            }
            Dispatch::Cancelled => {
                report.alerts_undelivered += 1;
            }
        }
    }

    /// Tail one file on the blocking pool
    async fn poll_source(
        &mut self,
        idx: usize,
        window_start: NaiveDateTime,
        now: NaiveDateTime,
    ) -> Vec<Event> {
        let source = &mut self.sources[idx];
        let tailer = source.tailer.clone();
        let state = source.state.clone();

        match tokio::task::spawn_blocking(move || tailer.poll(state, window_start, now)).await {
            Ok((events, state)) => {
                source.state = state;
                events
            }
            Err(e) => {
                error!(
                    file = %source.state.file_path.display(),
                    error = %e,
                    "Tail task failed, keeping previous position"
                );
                Vec::new()
            }
        }
    }
}

/// Send a payload unless the monitor is stopping
async fn dispatch(
    notifier: &dyn Notifier,
    shutdown: &watch::Receiver<bool>,
    payload: &AlertPayload,
) -> Dispatch {
    let mut shutdown = shutdown.clone();
    if *shutdown.borrow() {
        warn!(subject = %payload.subject, "Monitor stopping, alert not delivered");
        return Dispatch::Cancelled;
    }

    tokio::select! {
        delivered = notifier.send(payload) => {
            if delivered { Dispatch::Delivered } else { Dispatch::Failed }
        }
        _ = wait_for_stop(&mut shutdown) => {
            warn!(subject = %payload.subject, "Monitor stopping, alert not delivered");
            Dispatch::Cancelled
        }
    }
}

async fn wait_for_stop(shutdown: &mut watch::Receiver<bool>) {
    // A dropped sender never cancels a delivery
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Long-running log monitor
///
/// Build with [`Monitor::new`] and [`Monitor::with_source`], then either call
/// [`Monitor::start`] for the background poll loop or drive it manually with
/// [`Monitor::run_cycle`].
pub struct Monitor {
    name: String,
    core: Option<MonitorCore>,
    poll_interval: Duration,
    stop_timeout: Duration,
    is_running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<MonitorCore>>,
}

impl Monitor {
    pub fn new(name: impl Into<String>, config: AlertConfig, notifier: Arc<dyn Notifier>) -> Self {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = MonitorCore {
            name: name.clone(),
            sources: Vec::new(),
            counters: CounterStore::new(config.time_window),
            records: HashMap::new(),
            config,
            policy: AlertPolicy::new(),
            composer: AlertComposer::new(),
            notifier,
            first_run: true,
            shutdown: shutdown_rx,
        };

        Self {
            name,
            core: Some(core),
            poll_interval: Duration::from_secs(60),
            stop_timeout: Duration::from_secs(30),
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: None,
        }
    }

    /// Tail `path` as a file of `category`
    pub fn with_source(self, category: LogCategory, path: impl Into<PathBuf>) -> Self {
        self.with_tailer(LogTailer::new(category), path)
    }

    pub fn with_tailer(mut self, tailer: LogTailer, path: impl Into<PathBuf>) -> Self {
        if let Some(core) = self.core.as_mut() {
            core.sources.push(Source {
                tailer,
                state: TailState::new(path),
            });
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Monitor state; `None` while the poll task owns it
    pub fn core(&self) -> Option<&MonitorCore> {
        self.core.as_ref()
    }

    /// Run one cycle in the caller's task
    pub async fn run_cycle(&mut self, now: NaiveDateTime) -> Result<CycleReport, AppError> {
        let core = self
            .core
            .as_mut()
            .ok_or_else(|| AppError::internal("monitor is running in the background"))?;
        Ok(core.run_cycle(now).await)
    }

    /// Spawn the poll loop
    pub fn start(&mut self) -> Result<(), AppError> {
        if self.handle.is_some() {
            warn!(monitor = %self.name, "Monitor already running");
            return Ok(());
        }
        let core = self
            .core
            .take()
            .ok_or_else(|| AppError::internal("monitor state was lost"))?;

        self.shutdown_tx.send_replace(false);
        self.is_running.store(true, Ordering::SeqCst);

        let shutdown = self.shutdown_tx.subscribe();
        let is_running = Arc::clone(&self.is_running);
        let poll_interval = self.poll_interval;

        info!(
            monitor = %self.name,
            poll_interval_secs = poll_interval.as_secs_f64(),
            "Starting monitor loop"
        );
        self.handle = Some(tokio::spawn(run_loop(
            core,
            poll_interval,
            shutdown,
            is_running,
        )));
        Ok(())
    }

    /// Signal the loop and wait up to `stop_timeout` for it to finish
    pub async fn stop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.shutdown_tx.send_replace(true);

        let Some(mut handle) = self.handle.take() else {
            debug!(monitor = %self.name, "Monitor not running");
            return;
        };

        match timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(core)) => {
                self.core = Some(core);
                info!(monitor = %self.name, "Monitor stopped");
            }
            Ok(Err(e)) => {
                error!(monitor = %self.name, error = %e, "Monitor task failed");
            }
            Err(_) => {
                handle.abort();
                error!(
                    monitor = %self.name,
                    timeout_secs = self.stop_timeout.as_secs_f64(),
                    "Monitor did not stop in time, task aborted"
                );
            }
        }
    }
}

async fn run_loop(
    mut core: MonitorCore,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    is_running: Arc<AtomicBool>,
) -> MonitorCore {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let report = core.run_cycle(Utc::now().naive_utc()).await;
        if report.events_read > 0 || report.alerts_fired > 0 {
            info!(
                monitor = %core.name,
                events = report.events_read,
                fired = report.alerts_fired,
                delivered = report.alerts_delivered,
                suppressed = report.alerts_suppressed,
                undelivered = report.alerts_undelivered,
                "Cycle complete"
            );
        } else {
            debug!(monitor = %core.name, "Cycle complete, nothing new");
        }
    }

    is_running.store(false, Ordering::SeqCst);
    info!(monitor = %core.name, "Monitor loop exited");
    core
}
