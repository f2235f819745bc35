//! Heartbeat Scheduler
//!
//! Emits a periodic keep-alive tick while the session is authenticated. The
//! tick is posted into the client's event loop, which turns it into an
//! `api: "hb"` request. Heartbeats are never recorded in the ledger; a
//! missed one is superseded by the next.

use std::time::Duration;

use tokio::sync::mpsc;

use super::timer::TimerHandle;
use crate::infrastructure::config::WebSocketSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat requests.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            interval: settings.heartbeat_interval,
        }
    }
}

/// Periodic heartbeat timer.
///
/// Starting an already running scheduler restarts it, so there is never
/// more than one heartbeat timer per client.
#[derive(Debug)]
pub struct HeartbeatScheduler {
    config: HeartbeatConfig,
    timer: TimerHandle,
}

impl HeartbeatScheduler {
    /// Create a stopped scheduler.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            timer: TimerHandle::new(),
        }
    }

    /// Start (or restart) posting `tick` every interval.
    pub fn start<E>(&mut self, tx: &mpsc::UnboundedSender<E>, tick: E)
    where
        E: Clone + Send + 'static,
    {
        tracing::debug!(
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            "Starting heartbeat"
        );
        self.timer.arm_every(self.config.interval, tx, tick);
    }

    /// Stop posting ticks.
    pub fn stop(&mut self) {
        if self.timer.is_armed() {
            tracing::debug!("Stopping heartbeat");
        }
        self.timer.cancel();
    }

    /// Check whether the scheduler is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_armed()
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval
    }
}
