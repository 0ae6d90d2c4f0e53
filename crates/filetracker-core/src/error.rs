//! Error types for the tracker facade
//!
//! Each engine owns its own error enum next to its code; [`TrackerError`]
//! gathers them for callers that drive the whole tracker.

use thiserror::Error;

use crate::config::ConfigError;
use crate::executor::ExecutorError;
use crate::poller::PollerError;
use crate::sink::SinkError;

/// Main error type for tracker operations
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Command executor refused the operation
    #[error("Command executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Change poller refused the operation
    #[error("Change poller error: {0}")]
    Poller(#[from] PollerError),

    /// Log store read or close failed
    #[error("Log store error: {0}")]
    Sink(#[from] SinkError),
}

impl TrackerError {
    /// Check if this error was caused by the caller (vs an internal failure)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TrackerError::Config(_) | TrackerError::Executor(ExecutorError::Stopped)
        )
    }
}

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
