//! Filetracker core
//!
//! The two long-lived background engines of the file change tracker:
//!
//! - [`ChangePoller`](poller::ChangePoller): on a fixed interval, asks a
//!   [`ChangeSource`](source::ChangeSource) for file events newer than its
//!   checkpoint, persists each one to a [`LogSink`](sink::LogSink) and advances
//!   the checkpoint.
//! - [`CommandExecutor`](executor::CommandExecutor): consumes a bounded FIFO of
//!   raw command strings and runs only whitelisted executables, draining the
//!   queue on shutdown.
//!
//! Both engines publish a [`Heartbeat`](heartbeat::Heartbeat) that the health
//! probe reads. The [`FileChangeTracker`](tracker::FileChangeTracker) facade
//! ties them together behind the [`Tracker`](tracker::Tracker) trait consumed
//! by the HTTP boundary.
//!
//! # Design Principles
//! - One background task per engine, cancellation observed only at the loop top
//! - Failures end the current unit of work (one cycle, one command), never the process
//! - The command whitelist is a closed enum, not runtime data

pub mod config;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod poller;
pub mod sink;
pub mod source;
pub mod telemetry;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use executor::{CommandExecutor, ExecutorError, ExecutorState};
pub use heartbeat::Heartbeat;
pub use poller::{ChangePoller, ChangeScanner, Checkpoint, PollerError, PollerSettings};
pub use sink::{LogEntry, LogRecord, LogSink, SinkError};
pub use source::{ChangeEvent, ChangeFilter, ChangeSource, QueryOutcome, SourceError};
pub use telemetry::{MetricsHandle, TrackerMetrics};
pub use tracker::{FileChangeTracker, Tracker};

/// Crate version (from Cargo.toml)
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
