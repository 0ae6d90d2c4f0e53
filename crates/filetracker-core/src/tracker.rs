//! Tracker facade
//!
//! [`FileChangeTracker`] owns both engines and the log sink and exposes the
//! narrow [`Tracker`] surface the HTTP layer depends on.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::executor::{CommandExecutor, ExecutorError, ProcessRunner};
use crate::poller::{ChangePoller, ChangeScanner};
use crate::sink::{LogEntry, LogSink};
use crate::source::ChangeSource;
use crate::telemetry::MetricsHandle;

/// Operations offered to the boundary layer
#[async_trait::async_trait]
pub trait Tracker: Send + Sync {
    /// Enqueue raw command strings for the executor
    async fn add_commands(&self, commands: Vec<String>) -> std::result::Result<(), ExecutorError>;

    fn is_poller_alive(&self) -> bool;

    fn is_executor_alive(&self) -> bool;

    /// Most recent change log entries first
    async fn get_logs(&self, limit: usize, offset: usize) -> Result<Vec<LogEntry>>;
}

/// Poller, executor and log sink wired together
#[derive(Debug)]
pub struct FileChangeTracker {
    poller: ChangePoller,
    executor: CommandExecutor,
    sink: Arc<dyn LogSink>,
}

impl FileChangeTracker {
    pub fn new(poller: ChangePoller, executor: CommandExecutor, sink: Arc<dyn LogSink>) -> Self {
        Self {
            poller,
            executor,
            sink,
        }
    }

    /// Build both engines from configuration
    ///
    /// The poller's checkpoint starts at the current time, so events from
    /// before startup are never reported.
    pub fn from_config(
        config: &TrackerConfig,
        source: Arc<dyn ChangeSource>,
        sink: Arc<dyn LogSink>,
        metrics: MetricsHandle,
    ) -> Self {
        let scanner = ChangeScanner::new(config.directory.clone(), source, Arc::clone(&sink))
            .with_metrics(metrics.clone());
        let poller = ChangePoller::new(scanner, config.poller_settings());

        let runner = ProcessRunner::new(config.executor.command_timeout());
        let executor = CommandExecutor::new(Arc::new(runner)).with_metrics(metrics);

        Self::new(poller, executor, sink)
    }

    pub fn poller(&self) -> &ChangePoller {
        &self.poller
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Start both engines on the shared cancellation token
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        self.executor.start(cancel)?;
        self.poller.start(cancel)?;
        Ok(())
    }

    /// Drain the executor, stop the poller, then close the sink
    ///
    /// The sink is closed even when releasing the poller's source fails; the
    /// first error is returned.
    pub async fn shutdown(&self) -> Result<()> {
        self.executor.stop().await;
        let stopped = self.poller.stop().await;
        let closed = self.sink.close().await;

        stopped?;
        closed?;
        tracing::info!("tracker shut down");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Tracker for FileChangeTracker {
    async fn add_commands(&self, commands: Vec<String>) -> std::result::Result<(), ExecutorError> {
        self.executor.add_commands(commands).await
    }

    fn is_poller_alive(&self) -> bool {
        self.poller.is_alive()
    }

    fn is_executor_alive(&self) -> bool {
        self.executor.is_alive()
    }

    async fn get_logs(&self, limit: usize, offset: usize) -> Result<Vec<LogEntry>> {
        let records = self.sink.read_paginated(limit, offset).await?;
        Ok(records.into_iter().map(LogEntry::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::executor::{AuthorizedCommand, CommandError, CommandRunner, ExecutorState};
    use crate::poller::{Checkpoint, PollerSettings};
    use crate::sink::MemoryLogSink;
    use crate::source::{
        ChangeEvent, ChangeFilter, MemoryChangeSource, QueryOutcome, SourceError, SourceResult,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct RecordingRunner(Mutex<Vec<String>>);

    #[async_trait::async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, command: &AuthorizedCommand) -> std::result::Result<(), CommandError> {
            self.0.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    fn tracker(
        source: Arc<MemoryChangeSource>,
        runner: Arc<RecordingRunner>,
    ) -> FileChangeTracker {
        let sink: Arc<dyn LogSink> = Arc::new(MemoryLogSink::new());
        let scanner = ChangeScanner::new("/tmp/watched", source, Arc::clone(&sink))
            .with_checkpoint(Checkpoint::new(1_000));
        let poller = ChangePoller::new(scanner, PollerSettings::new(Duration::from_secs(2)));
        FileChangeTracker::new(poller, CommandExecutor::new(runner), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end() {
        let source = Arc::new(MemoryChangeSource::new());
        let runner = Arc::new(RecordingRunner::default());
        let tracker = tracker(source.clone(), runner.clone());

        assert!(!tracker.is_poller_alive());
        assert!(!tracker.is_executor_alive());

        let cancel = CancellationToken::new();
        tracker.start(&cancel).unwrap();

        source.push(ChangeEvent::new("/tmp/watched/new.txt", 1_700_000_000));
        source.push(ChangeEvent::new("/tmp/elsewhere/skip.txt", 1_700_000_000));
        tracker
            .add_commands(vec!["touch /tmp/watched/x".into()])
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(tracker.is_poller_alive());
        assert!(tracker.is_executor_alive());

        let logs = tracker.get_logs(0, 0).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].details.target_path(), Some("/tmp/watched/new.txt"));
        assert_eq!(logs[0].log_time, "2023-11-14T22:13:20Z");

        tracker.shutdown().await.unwrap();

        assert_eq!(tracker.executor().state(), ExecutorState::Stopped);
        assert!(source.is_closed());
        assert_eq!(*runner.0.lock().unwrap(), vec!["touch /tmp/watched/x"]);
        assert_eq!(
            tracker.add_commands(vec!["touch late".into()]).await,
            Err(ExecutorError::Stopped)
        );

        // a closed memory sink still serves reads
        assert_eq!(tracker.get_logs(10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let tracker = tracker(
            Arc::new(MemoryChangeSource::new()),
            Arc::new(RecordingRunner::default()),
        );
        let cancel = CancellationToken::new();
        tracker.start(&cancel).unwrap();

        let err = tracker.start(&cancel).unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Executor(ExecutorError::AlreadyStarted)
        ));

        tracker.shutdown().await.unwrap();
    }

    #[derive(Debug)]
    struct StuckSource;

    #[async_trait::async_trait]
    impl ChangeSource for StuckSource {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn query(&self, _filter: &ChangeFilter) -> SourceResult<QueryOutcome> {
            Ok(QueryOutcome::Empty)
        }

        async fn close(&self) -> SourceResult<()> {
            Err(SourceError::query("client refused to disconnect"))
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_sink_when_source_release_fails() {
        let sink = Arc::new(MemoryLogSink::new());
        let scanner = ChangeScanner::new("/tmp/watched", Arc::new(StuckSource), sink.clone());
        let poller = ChangePoller::new(scanner, PollerSettings::new(Duration::from_secs(2)));
        let tracker = FileChangeTracker::new(
            poller,
            CommandExecutor::new(Arc::new(RecordingRunner::default())),
            sink.clone(),
        );

        let cancel = CancellationToken::new();
        tracker.start(&cancel).unwrap();

        let err = tracker.shutdown().await.unwrap_err();
        assert!(matches!(err, TrackerError::Poller(_)));

        let write = sink.write(&ChangeEvent::new("/tmp/watched/late", 1)).await;
        assert!(matches!(write, Err(crate::sink::SinkError::Closed)));
    }
}
