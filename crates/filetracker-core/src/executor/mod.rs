//! Whitelisted command executor
//!
//! Raw command strings go onto a bounded FIFO queue. One background worker
//! takes them off in order, parses each one, checks it against the closed
//! [`AllowedCommand`] set and hands authorized commands to a
//! [`CommandRunner`]. Per-command failures are logged and counted; nothing is
//! retried.
//!
//! Lifecycle: `Created -> Running -> Draining -> Stopped`. On cancellation the
//! worker stops taking heartbeat ticks, closes the queue and runs every
//! command that was already accepted before it reports `Stopped`.

pub mod command;
pub mod runner;

pub use command::{AllowedCommand, AuthorizedCommand, CommandError, CommandRequest};
pub use runner::{CommandRunner, ProcessRunner};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::heartbeat::Heartbeat;
use crate::telemetry::{CommandOutcome, MetricsHandle};

/// Commands that can wait in the queue before `add_commands` suspends
pub const QUEUE_CAPACITY: usize = 100;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
/// Silence after which the executor is reported as not alive
pub const LIVENESS_THRESHOLD: Duration = Duration::from_secs(120);

/// Errors returned to callers of the executor
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorError {
    /// The executor is draining or has stopped and accepts no more commands
    #[error("command executor is stopped")]
    Stopped,

    #[error("command executor already started")]
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Created,
    Running,
    Draining,
    Stopped,
}

enum Lifecycle {
    Created(mpsc::Receiver<String>),
    Running {
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    },
    Finished,
}

/// Shared pieces the worker needs
#[derive(Clone)]
struct Worker {
    runner: Arc<dyn CommandRunner>,
    heartbeat: Arc<Heartbeat>,
    state: Arc<watch::Sender<ExecutorState>>,
    metrics: MetricsHandle,
}

/// Bounded-queue command executor
pub struct CommandExecutor {
    tx: mpsc::Sender<String>,
    lifecycle: Mutex<Lifecycle>,
    worker: Worker,
}

impl CommandExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let (state, _) = watch::channel(ExecutorState::Created);

        Self {
            tx,
            lifecycle: Mutex::new(Lifecycle::Created(rx)),
            worker: Worker {
                runner,
                heartbeat: Arc::new(Heartbeat::new(LIVENESS_THRESHOLD)),
                state: Arc::new(state),
                metrics: MetricsHandle::disabled(),
            },
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsHandle) -> Self {
        self.worker.metrics = metrics;
        self
    }

    pub fn state(&self) -> ExecutorState {
        *self.worker.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<ExecutorState> {
        self.worker.state.subscribe()
    }

    /// Enqueue `commands` in order
    ///
    /// Suspends while the queue is full. Returns [`ExecutorError::Stopped`]
    /// once draining has begun; commands of the batch that were enqueued
    /// before that point still run.
    pub async fn add_commands(&self, commands: Vec<String>) -> Result<(), ExecutorError> {
        if matches!(
            self.state(),
            ExecutorState::Draining | ExecutorState::Stopped
        ) {
            return Err(ExecutorError::Stopped);
        }

        for command in commands {
            if self.tx.send(command).await.is_err() {
                return Err(ExecutorError::Stopped);
            }
            self.worker.metrics.set_queue_depth(self.queued());
        }

        Ok(())
    }

    /// Commands sitting in the queue; callers blocked on a full queue are not counted
    pub fn queued(&self) -> usize {
        QUEUE_CAPACITY - self.tx.capacity()
    }

    /// Launch the consumer loop
    pub fn start(&self, cancel: &CancellationToken) -> Result<(), ExecutorError> {
        let mut lifecycle = self.lock_lifecycle();
        let rx = match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::Created(rx) => rx,
            other => {
                *lifecycle = other;
                return Err(ExecutorError::AlreadyStarted);
            }
        };

        let shutdown = cancel.child_token();
        self.worker.state.send_replace(ExecutorState::Running);
        let task = tokio::spawn(self.worker.clone().run(rx, shutdown.clone()));

        tracing::info!(capacity = QUEUE_CAPACITY, "command executor started");
        *lifecycle = Lifecycle::Running { shutdown, task };
        Ok(())
    }

    /// Cancel the worker and wait until every accepted command has been run
    ///
    /// An executor that was never started drains its queue inline.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lock_lifecycle(), Lifecycle::Finished);

        match previous {
            Lifecycle::Created(rx) => self.worker.drain(rx).await,
            Lifecycle::Running { shutdown, task } => {
                shutdown.cancel();
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "command executor task failed");
                    self.worker.state.send_replace(ExecutorState::Stopped);
                }
            }
            Lifecycle::Finished => {
                // another caller is draining
                let mut state = self.subscribe();
                let _ = state.wait_for(|s| *s == ExecutorState::Stopped).await;
            }
        }
    }

    /// True iff the worker beat within the last two minutes
    pub fn is_alive(&self) -> bool {
        self.worker.heartbeat.is_alive()
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("state", &self.state())
            .field("queued", &self.queued())
            .field("runner", &self.worker.runner)
            .finish()
    }
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<String>, shutdown: CancellationToken) {
        let mut tick = interval(HEARTBEAT_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = tick.tick() => self.heartbeat.beat(),

                next = rx.recv() => match next {
                    Some(raw) => {
                        self.metrics.set_queue_depth(rx.len());
                        self.execute(&raw).await;
                    }
                    None => break,
                },
            }
        }

        self.drain(rx).await;
    }

    async fn drain(&self, mut rx: mpsc::Receiver<String>) {
        self.state.send_replace(ExecutorState::Draining);
        rx.close();

        tracing::info!(pending = rx.len(), "draining command queue");

        while let Some(raw) = rx.recv().await {
            self.metrics.set_queue_depth(rx.len());
            self.execute(&raw).await;
        }

        self.state.send_replace(ExecutorState::Stopped);
        tracing::info!("command executor stopped");
    }

    async fn execute(&self, raw: &str) {
        let result = match CommandRequest::parse(raw).and_then(CommandRequest::authorize) {
            Ok(command) => self.runner.run(&command).await.map(|()| command),
            Err(e) => Err(e),
        };

        match result {
            Ok(command) => {
                self.metrics.record_command(CommandOutcome::Executed);
                tracing::debug!(command = %command, "command executed");
            }
            Err(e) => {
                let outcome = e.outcome();
                self.metrics.record_command(outcome);
                match outcome {
                    CommandOutcome::Failed => {
                        tracing::error!(command = raw, error = %e, "command failed")
                    }
                    _ => tracing::warn!(command = raw, error = %e, "command rejected"),
                }
            }
        }
    }
}
