//! Change poller engine
//!
//! A [`ChangeScanner`] runs one scan cycle: query the source for events under
//! the watch directory newer than the checkpoint, persist each row in the
//! order received, and advance the checkpoint. A [`ChangePoller`] drives the
//! scanner from a single background task and publishes a heartbeat.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::heartbeat::Heartbeat;
use crate::sink::{LogSink, SinkError};
use crate::source::{ChangeFilter, ChangeSource, QueryOutcome, SourceError};
use crate::telemetry::{CycleResult, MetricsHandle};

/// Silence tolerated on top of the check frequency before the poller is
/// reported as not alive
pub const LIVENESS_GRACE: Duration = Duration::from_secs(30);

/// Errors that can occur in the change poller
#[derive(Error, Debug)]
pub enum PollerError {
    /// The change source could not answer; the cycle ends, checkpoint unchanged
    #[error("Change source query failed: {0}")]
    Query(#[source] SourceError),

    /// A row could not be written; the rest of the cycle is abandoned
    #[error("Failed to persist change event: {0}")]
    Persist(#[source] SinkError),

    /// `start` was called on a poller that is running or stopped
    #[error("Change poller already started")]
    AlreadyStarted,

    /// Releasing the change source failed during stop
    #[error("Failed to release change source: {0}")]
    Release(#[source] SourceError),
}

/// Epoch-seconds high-water mark of events already persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(i64);

impl Checkpoint {
    pub fn new(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Checkpoint at the current wall-clock second
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn value(self) -> i64 {
        self.0
    }

    /// Move forward to `seconds` if it is newer; returns whether it moved
    pub fn advance(&mut self, seconds: i64) -> bool {
        if seconds > self.0 {
            self.0 = seconds;
            true
        } else {
            false
        }
    }
}

/// Summary of one completed scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Rows returned by the source
    pub rows: usize,
    /// Rows written to the sink
    pub persisted: usize,
    /// Rows whose `time` could not be parsed
    pub unparsed: usize,
    /// Checkpoint after the cycle
    pub checkpoint: Checkpoint,
}

/// One-cycle scan logic, owned by the poller's loop
#[derive(Debug)]
pub struct ChangeScanner {
    directory: String,
    checkpoint: Checkpoint,
    source: Arc<dyn ChangeSource>,
    sink: Arc<dyn LogSink>,
    metrics: MetricsHandle,
}

impl ChangeScanner {
    /// Create a scanner whose checkpoint starts at the current time
    pub fn new(
        directory: impl Into<String>,
        source: Arc<dyn ChangeSource>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            directory: directory.into(),
            checkpoint: Checkpoint::now(),
            source,
            sink,
            metrics: MetricsHandle::disabled(),
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn source(&self) -> &Arc<dyn ChangeSource> {
        &self.source
    }

    /// Filter for the next cycle
    pub fn filter(&self) -> ChangeFilter {
        ChangeFilter::new(self.directory.clone(), self.checkpoint.value())
    }

    /// Run one scan cycle
    ///
    /// Checkpoint advances made before a persist failure are kept; the rows
    /// after the failure are picked up again by the next cycle.
    pub async fn scan(&mut self) -> Result<CycleReport, PollerError> {
        let filter = self.filter();

        let rows = match self.source.query(&filter).await {
            Ok(QueryOutcome::Rows(rows)) => rows,
            Ok(QueryOutcome::Empty) => {
                tracing::trace!(filter = %filter, "no new change events");
                self.metrics.record_cycle(CycleResult::Empty);
                return Ok(self.report(0, 0, 0));
            }
            Err(e) => {
                self.metrics.record_cycle(CycleResult::QueryFailed);
                return Err(PollerError::Query(e));
            }
        };

        let mut persisted = 0;
        let mut unparsed = 0;

        for row in &rows {
            if let Err(e) = self.sink.write(row).await {
                self.metrics.record_cycle(CycleResult::PersistFailed);
                tracing::debug!(
                    persisted,
                    remaining = rows.len() - persisted,
                    "abandoning scan cycle"
                );
                return Err(PollerError::Persist(e));
            }
            persisted += 1;
            self.metrics.record_persisted();
            tracing::debug!(
                target_path = row.target_path().unwrap_or_default(),
                time = row.time().unwrap_or_default(),
                "change detected"
            );

            match row.parsed_time() {
                Some(time) => {
                    if self.checkpoint.advance(time) {
                        self.metrics.set_checkpoint(time);
                    }
                }
                None => {
                    unparsed += 1;
                    tracing::warn!(
                        target_path = row.target_path().unwrap_or_default(),
                        time = row.time().unwrap_or_default(),
                        "change event time is not an integer, checkpoint not advanced"
                    );
                }
            }
        }

        self.metrics.record_cycle(CycleResult::Ok);
        tracing::debug!(
            rows = rows.len(),
            persisted,
            checkpoint = self.checkpoint.value(),
            "scan cycle complete"
        );
        Ok(self.report(rows.len(), persisted, unparsed))
    }

    fn report(&self, rows: usize, persisted: usize, unparsed: usize) -> CycleReport {
        CycleReport {
            rows,
            persisted,
            unparsed,
            checkpoint: self.checkpoint,
        }
    }
}

/// Timing for the poller loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    check_frequency: Duration,
    heartbeat_interval: Duration,
}

impl PollerSettings {
    /// Scan every `check_frequency`, heartbeat on the same period
    pub fn new(check_frequency: Duration) -> Self {
        let check_frequency = non_zero(check_frequency);
        Self {
            check_frequency,
            heartbeat_interval: check_frequency,
        }
    }

    /// Beat on its own period, kept below the liveness threshold
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        let ceiling = self.liveness_threshold() - Duration::from_secs(1);
        self.heartbeat_interval = non_zero(heartbeat_interval).min(ceiling);
        self
    }

    pub fn check_frequency(&self) -> Duration {
        self.check_frequency
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Silence after which the poller is reported as not alive
    pub fn liveness_threshold(&self) -> Duration {
        self.check_frequency + LIVENESS_GRACE
    }
}

fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_secs(1))
}

enum PollerState {
    Idle(ChangeScanner),
    Running {
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
    Stopped,
}

/// Background change poller
pub struct ChangePoller {
    state: Mutex<PollerState>,
    source: Arc<dyn ChangeSource>,
    heartbeat: Arc<Heartbeat>,
    settings: PollerSettings,
}

impl ChangePoller {
    pub fn new(scanner: ChangeScanner, settings: PollerSettings) -> Self {
        Self {
            source: Arc::clone(scanner.source()),
            state: Mutex::new(PollerState::Idle(scanner)),
            heartbeat: Arc::new(Heartbeat::new(settings.liveness_threshold())),
            settings,
        }
    }

    pub fn settings(&self) -> PollerSettings {
        self.settings
    }

    /// Launch the background loop and return immediately
    ///
    /// The loop ends when `cancel` (or [`ChangePoller::stop`]) fires. A poller
    /// runs at most once; any further call returns
    /// [`PollerError::AlreadyStarted`].
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), PollerError> {
        let mut state = self.lock_state();
        let scanner = match std::mem::replace(&mut *state, PollerState::Stopped) {
            PollerState::Idle(scanner) => scanner,
            other => {
                *state = other;
                return Err(PollerError::AlreadyStarted);
            }
        };

        let shutdown = cancel.child_token();
        let task = tokio::spawn(run_loop(
            scanner,
            Arc::clone(&self.heartbeat),
            self.settings,
            shutdown.clone(),
        ));

        tracing::info!(
            source = self.source.name(),
            check_frequency_secs = self.settings.check_frequency.as_secs(),
            "change poller started"
        );
        *state = PollerState::Running { shutdown, task };
        Ok(())
    }

    /// Stop the loop between cycles and release the change source
    ///
    /// An in-flight query is allowed to finish. Calling `stop` again is a
    /// no-op.
    pub async fn stop(&self) -> Result<(), PollerError> {
        let previous = std::mem::replace(&mut *self.lock_state(), PollerState::Stopped);

        match previous {
            PollerState::Stopped => return Ok(()),
            PollerState::Idle(_) => {}
            PollerState::Running { shutdown, task } => {
                shutdown.cancel();
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "change poller task failed");
                }
            }
        }

        self.source.close().await.map_err(PollerError::Release)?;
        tracing::info!("change poller stopped");
        Ok(())
    }

    /// True iff the loop beat within `check_frequency + 30s`
    pub fn is_alive(&self) -> bool {
        self.heartbeat.is_alive()
    }

    fn lock_state(&self) -> MutexGuard<'_, PollerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ChangePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangePoller")
            .field("source", &self.source.name())
            .field("settings", &self.settings)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

async fn run_loop(
    mut scanner: ChangeScanner,
    heartbeat: Arc<Heartbeat>,
    settings: PollerSettings,
    shutdown: CancellationToken,
) {
    let mut heartbeat_tick = interval(settings.heartbeat_interval);
    heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut scan_tick = interval_at(
        Instant::now() + settings.check_frequency,
        settings.check_frequency,
    );
    scan_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                tracing::debug!(checkpoint = scanner.checkpoint().value(), "change poller shutting down");
                break;
            }

            _ = heartbeat_tick.tick() => heartbeat.beat(),

            _ = scan_tick.tick() => {
                if let Err(e) = scanner.scan().await {
                    tracing::error!(error = %e, "scan cycle failed");
                }
            }
        }
    }
}
