//! Cancellable Timers
//!
//! One handle type for every delayed action the client schedules: the
//! periodic heartbeat, the one-shot replay of a timed-out request, and the
//! one-shot reconnect. A fired timer does not run any logic itself; it posts
//! an event into the owning event loop's channel, so all state changes stay
//! on the loop.
//!
//! Arming a handle cancels whatever it was armed with before, so a handle
//! never drives two timers at once. Dropping a handle cancels it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Shortest period accepted by [`TimerHandle::arm_every`].
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to at most one pending timer.
#[derive(Debug, Default)]
pub struct TimerHandle {
    token: Option<CancellationToken>,
}

impl TimerHandle {
    /// Create an unarmed handle.
    #[must_use]
    pub const fn new() -> Self {
        Self { token: None }
    }

    /// Post `event` once after `delay`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm_once<E>(&mut self, delay: Duration, tx: &mpsc::UnboundedSender<E>, event: E)
    where
        E: Send + 'static,
    {
        let token = self.rearm();
        let tx = tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    token.cancel();
                    let _ = tx.send(event);
                }
            }
        });
    }

    /// Post a clone of `event` every `period`, first after one full period.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm_every<E>(&mut self, period: Duration, tx: &mpsc::UnboundedSender<E>, event: E)
    where
        E: Clone + Send + 'static,
    {
        let token = self.rearm();
        let tx = tx.clone();
        let period = period.max(MIN_PERIOD);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        if tx.send(event.clone()).is_err() {
                            tracing::debug!("Timer channel closed, stopping periodic timer");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Check whether a timer is pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.token.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    fn rearm(&mut self) -> CancellationToken {
        self.cancel();
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        token
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
