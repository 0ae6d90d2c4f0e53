//! Service assembly
//!
//! Builds the tracker from configuration, serves the HTTP API and tears both
//! down in order once the shared cancellation token fires.

use std::sync::Arc;

use filetracker_core::config::{ConfigError, StorageBackend};
use filetracker_core::sink::MemoryLogSink;
use filetracker_core::source::OsqueryCliSource;
use filetracker_core::{
    FileChangeTracker, LogSink, MetricsHandle, TrackerConfig, TrackerError, TrackerMetrics,
};
use filetracker_storage::{SledLogSink, StorageError};
use prometheus::Registry;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::handler::{create_router, AppState};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to open change log: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("HTTP server error: {0}")]
    Io(#[from] std::io::Error),
}

/// A configured tracker plus its HTTP surface
pub struct TrackerApp {
    config: TrackerConfig,
    tracker: Arc<FileChangeTracker>,
    registry: Registry,
}

impl TrackerApp {
    /// Open the log store, register metrics and wire both engines
    pub fn build(config: TrackerConfig) -> Result<Self, AppError> {
        let registry = Registry::new();
        let metrics = Arc::new(TrackerMetrics::new()?);
        metrics.register(&registry)?;

        let sink: Arc<dyn LogSink> = match config.storage.backend {
            StorageBackend::Sled => Arc::new(SledLogSink::open(&config.storage.path)?),
            StorageBackend::Memory => Arc::new(MemoryLogSink::new()),
        };
        let source = Arc::new(OsqueryCliSource::from_config(&config.osquery));

        let tracker = FileChangeTracker::from_config(
            &config,
            source,
            sink,
            MetricsHandle::from(metrics),
        );

        tracing::info!(
            directory = %config.directory,
            check_frequency_secs = config.check_frequency,
            backend = ?config.storage.backend,
            "tracker configured"
        );

        Ok(Self {
            config,
            tracker: Arc::new(tracker),
            registry,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<FileChangeTracker> {
        &self.tracker
    }

    pub fn router(&self) -> axum::Router {
        create_router(AppState::new(self.tracker.clone(), self.registry.clone()))
    }

    /// Bind the configured address and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> Result<(), AppError> {
        let listener = TcpListener::bind(self.config.http_addr()).await?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already bound listener until `cancel` fires
    ///
    /// The HTTP server stops accepting first; the executor queue is then
    /// drained, the poller stopped and the log store closed.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> Result<(), AppError> {
        self.tracker.start(&cancel)?;
        tracing::info!(addr = %listener.local_addr()?, "http server listening");

        let shutdown = cancel.clone();
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        // the server can also end on its own; the engines must stop either way
        cancel.cancel();
        self.tracker.shutdown().await?;
        served?;
        Ok(())
    }
}
