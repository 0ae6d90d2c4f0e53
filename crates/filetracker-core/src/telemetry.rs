//! Prometheus metrics for the tracker engines
//!
//! - `filetracker_poll_cycles_total` (counter) - Scan cycles by result
//! - `filetracker_events_persisted_total` (counter) - Change events written to the log
//! - `filetracker_checkpoint_seconds` (gauge) - Current poller checkpoint
//! - `filetracker_commands_total` (counter) - Commands handled by outcome
//! - `filetracker_command_queue_depth` (gauge) - Commands waiting in the queue
//!
//! Engines hold a [`MetricsHandle`]; a disabled handle makes every record call
//! a no-op so engines can run without a registry.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

const NAMESPACE: &str = "filetracker";

/// Result label for `poll_cycles_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Ok,
    Empty,
    QueryFailed,
    PersistFailed,
}

impl CycleResult {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleResult::Ok => "ok",
            CycleResult::Empty => "empty",
            CycleResult::QueryFailed => "query_failed",
            CycleResult::PersistFailed => "persist_failed",
        }
    }
}

/// Outcome label for `commands_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Executed,
    ParseError,
    NotWhitelisted,
    Failed,
}

impl CommandOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandOutcome::Executed => "executed",
            CommandOutcome::ParseError => "parse_error",
            CommandOutcome::NotWhitelisted => "not_whitelisted",
            CommandOutcome::Failed => "failed",
        }
    }
}

/// Tracker metrics for Prometheus
pub struct TrackerMetrics {
    poll_cycles_total: IntCounterVec,
    events_persisted_total: IntCounter,
    checkpoint_seconds: IntGauge,
    commands_total: IntCounterVec,
    command_queue_depth: IntGauge,
}

impl TrackerMetrics {
    /// Create the metric family set (not yet registered)
    pub fn new() -> Result<Self, prometheus::Error> {
        let poll_cycles_total = IntCounterVec::new(
            Opts::new("poll_cycles_total", "Total number of change scan cycles by result")
                .namespace(NAMESPACE),
            &["result"],
        )?;

        let events_persisted_total = IntCounter::with_opts(
            Opts::new(
                "events_persisted_total",
                "Total number of change events written to the log",
            )
            .namespace(NAMESPACE),
        )?;

        let checkpoint_seconds = IntGauge::with_opts(
            Opts::new(
                "checkpoint_seconds",
                "Epoch seconds of the newest change event seen by the poller",
            )
            .namespace(NAMESPACE),
        )?;

        let commands_total = IntCounterVec::new(
            Opts::new("commands_total", "Total number of commands handled by outcome")
                .namespace(NAMESPACE),
            &["outcome"],
        )?;

        let command_queue_depth = IntGauge::with_opts(
            Opts::new(
                "command_queue_depth",
                "Number of commands waiting in the executor queue",
            )
            .namespace(NAMESPACE),
        )?;

        Ok(Self {
            poll_cycles_total,
            events_persisted_total,
            checkpoint_seconds,
            commands_total,
            command_queue_depth,
        })
    }

    /// Register every metric with `registry`
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.poll_cycles_total.clone()))?;
        registry.register(Box::new(self.events_persisted_total.clone()))?;
        registry.register(Box::new(self.checkpoint_seconds.clone()))?;
        registry.register(Box::new(self.commands_total.clone()))?;
        registry.register(Box::new(self.command_queue_depth.clone()))?;
        Ok(())
    }

    pub fn poll_cycles(&self, result: CycleResult) -> u64 {
        self.poll_cycles_total
            .with_label_values(&[result.as_str()])
            .get()
    }

    pub fn events_persisted(&self) -> u64 {
        self.events_persisted_total.get()
    }

    pub fn checkpoint(&self) -> i64 {
        self.checkpoint_seconds.get()
    }

    pub fn commands(&self, outcome: CommandOutcome) -> u64 {
        self.commands_total
            .with_label_values(&[outcome.as_str()])
            .get()
    }

    pub fn queue_depth(&self) -> i64 {
        self.command_queue_depth.get()
    }
}

/// Cheap, cloneable access to optional [`TrackerMetrics`]
#[derive(Clone, Default)]
pub struct MetricsHandle(Option<Arc<TrackerMetrics>>);

impl MetricsHandle {
    /// Handle that records nothing
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<&TrackerMetrics> {
        self.0.as_deref()
    }

    pub fn record_cycle(&self, result: CycleResult) {
        if let Some(m) = self.get() {
            m.poll_cycles_total
                .with_label_values(&[result.as_str()])
                .inc();
        }
    }

    pub fn record_persisted(&self) {
        if let Some(m) = self.get() {
            m.events_persisted_total.inc();
        }
    }

    pub fn set_checkpoint(&self, checkpoint: i64) {
        if let Some(m) = self.get() {
            m.checkpoint_seconds.set(checkpoint);
        }
    }

    pub fn record_command(&self, outcome: CommandOutcome) {
        if let Some(m) = self.get() {
            m.commands_total.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    pub fn set_queue_depth(&self, depth: usize) {
        if let Some(m) = self.get() {
            m.command_queue_depth
                .set(i64::try_from(depth).unwrap_or(i64::MAX));
        }
    }
}

impl From<Arc<TrackerMetrics>> for MetricsHandle {
    fn from(metrics: Arc<TrackerMetrics>) -> Self {
        Self(Some(metrics))
    }
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("MetricsHandle")
            .field(&self.0.is_some())
            .finish()
    }
}
