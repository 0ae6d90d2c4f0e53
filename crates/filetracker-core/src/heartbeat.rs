//! Liveness heartbeats
//!
//! Each background engine owns one [`Heartbeat`]. The engine's own loop calls
//! [`Heartbeat::beat`] on a timer; health probes call [`Heartbeat::is_alive`].
//! A heartbeat only proves the loop is still being scheduled, it cannot tell a
//! stuck loop from a slow one.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Lock-guarded last-beat timestamp with a liveness threshold
#[derive(Debug)]
pub struct Heartbeat {
    last_beat: Mutex<Option<Instant>>,
    threshold: Duration,
}

impl Heartbeat {
    /// Create a heartbeat that reports alive for `threshold` after each beat
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_beat: Mutex::new(None),
            threshold,
        }
    }

    /// Silence allowed before the engine is reported as not alive
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Record a beat at the current instant
    pub fn beat(&self) {
        *self.lock() = Some(Instant::now());
    }

    /// Instant of the most recent beat, if any
    pub fn last_beat(&self) -> Option<Instant> {
        *self.lock()
    }

    /// True iff a beat was recorded less than `threshold` ago
    pub fn is_alive(&self) -> bool {
        match *self.lock() {
            Some(at) => at.elapsed() < self.threshold,
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Instant>> {
        // The guarded value is a plain timestamp, a panic mid-write cannot corrupt it.
        self.last_beat.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_not_alive_before_first_beat() {
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        assert!(!heartbeat.is_alive());
        assert!(heartbeat.last_beat().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alive_immediately_after_beat() {
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        heartbeat.beat();
        assert!(heartbeat.is_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_after_threshold() {
        let heartbeat = Heartbeat::new(Duration::from_secs(10));
        heartbeat.beat();

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert!(heartbeat.is_alive());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!heartbeat.is_alive());

        heartbeat.beat();
        assert!(heartbeat.is_alive());
    }
}
