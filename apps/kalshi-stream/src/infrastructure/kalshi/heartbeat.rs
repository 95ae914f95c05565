//! Heartbeat Manager
//!
//! Keeps a connection alive by writing a liveness probe on a fixed timer,
//! and optionally declares it dead when no inbound frame arrives within a
//! bound after a probe.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::StreamSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// How long a probe may go unanswered. `None` disables the check.
    pub pong_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            pong_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Option<Duration>) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }

    /// Create configuration from `StreamSettings`.
    #[must_use]
    pub const fn from_stream_settings(settings: &StreamSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.pong_timeout,
        }
    }
}

/// Liveness bookkeeping shared between the read task and the heartbeat.
#[derive(Debug)]
pub struct HeartbeatState {
    last_seen: RwLock<Instant>,
    probe_outstanding: AtomicBool,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: RwLock::new(Instant::now()),
            probe_outstanding: AtomicBool::new(false),
        }
    }

    /// Record inbound traffic. Any frame counts as an answer to a probe.
    pub fn record_pong(&self) {
        *self.last_seen.write() = Instant::now();
        self.probe_outstanding.store(false, Ordering::SeqCst);
    }

    /// Mark that a probe was written.
    pub fn mark_ping_sent(&self) {
        self.probe_outstanding.store(true, Ordering::SeqCst);
    }

    /// Whether a probe is awaiting an answer.
    #[must_use]
    pub fn is_waiting_for_pong(&self) -> bool {
        self.probe_outstanding.load(Ordering::SeqCst)
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_pong(&self) -> Duration {
        self.last_seen.read().elapsed()
    }
}

/// Writes one liveness probe on the current connection.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Write a probe frame.
    ///
    /// # Errors
    ///
    /// Returns a description of the write failure.
    async fn send_probe(&self) -> Result<(), String>;
}

/// Error type for heartbeat failures. Both end the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// No inbound frame within the pong timeout.
    #[error("heartbeat timeout after {0:?}")]
    Timeout(Duration),

    /// Writing the probe failed.
    #[error("keep-alive write failed: {0}")]
    ProbeFailed(String),
}

/// Heartbeat loop for one connection.
pub struct HeartbeatManager<P> {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    probe: P,
    cancel: CancellationToken,
}

impl<P: LivenessProbe> HeartbeatManager<P> {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        probe: P,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            probe,
            cancel,
        }
    }

    /// Run until cancelled or the connection is found dead.
    ///
    /// # Errors
    ///
    /// Returns `HeartbeatError` when a probe write fails or the pong timeout
    /// elapses. Cancellation returns `Ok(())`.
    pub async fn run(self) -> Result<(), HeartbeatError> {
        // `interval` panics on a zero period.
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the connection is fresh.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    return Ok(());
                }
                _ = interval.tick() => {
                    self.check_and_ping().await?;
                }
            }
        }
    }

    async fn check_and_ping(&self) -> Result<(), HeartbeatError> {
        if let Some(timeout) = self.config.pong_timeout {
            let elapsed = self.state.time_since_pong();
            if self.state.is_waiting_for_pong() && elapsed > timeout {
                tracing::warn!(
                    elapsed_secs = elapsed.as_secs(),
                    timeout_secs = timeout.as_secs(),
                    "Heartbeat timeout detected"
                );
                return Err(HeartbeatError::Timeout(elapsed));
            }
        }

        self.probe
            .send_probe()
            .await
            .map_err(HeartbeatError::ProbeFailed)?;
        if !self.state.is_waiting_for_pong() {
            self.state.mark_ping_sent();
        }
        Ok(())
    }
}
