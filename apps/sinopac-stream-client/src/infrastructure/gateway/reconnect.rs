//! Reconnection Policy
//!
//! Delay schedule for re-establishing the gateway transport. The reference
//! behavior is a fixed 3 second delay, which is the degenerate case of the
//! backoff policy (multiplier 1.0, no jitter). Longer schedules and jitter
//! are enabled through `SINOPAC_RECONNECT_MULTIPLIER` and
//! `SINOPAC_RECONNECT_JITTER`.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt (1.0 = fixed delay).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

impl ReconnectConfig {
    /// Fixed delay, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max.max(settings.reconnect_delay_initial),
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: clamp_jitter(settings.reconnect_jitter),
            max_attempts: settings.max_reconnect_attempts,
        }
    }
}

/// Jitter outside `0.0..=1.0` (or NaN) would allow zero or negative delays.
fn clamp_jitter(factor: f64) -> f64 {
    if factor.is_finite() {
        factor.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Reconnection delay schedule.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sinopac_stream_client::infrastructure::gateway::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
///
/// // Successful authentication
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` once `max_attempts` attempts have been handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);
        Some(delay)
    }

    /// Reset the schedule after a successful authentication.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts handed out since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn grow(&self, delay: Duration) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let scaled = (delay.as_millis() as f64 * self.config.multiplier).round();
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = (scaled as u128).min(self.config.max_delay.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}

/// Error type for reconnection failures.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_fixed_three_seconds() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..5 {
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
        }
        assert!(policy.should_retry());
    }

    #[test]
    fn backoff_grows_until_cap() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn attempt_limit_is_enforced() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::fixed(Duration::from_millis(10))
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert_eq!(policy.attempt_count(), 2);
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.2,
                ..ReconnectConfig::fixed(Duration::from_millis(1000))
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((800..=1200).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn settings_conversion_keeps_cap_above_initial() {
        let settings = WebSocketSettings {
            reconnect_delay_initial: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(1),
            ..WebSocketSettings::default()
        };
        let config = ReconnectConfig::from_websocket_settings(&settings);
        assert_eq!(config.max_delay, Duration::from_secs(5));
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }

    #[test]
    fn settings_jitter_reaches_the_policy() {
        let settings = WebSocketSettings {
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(1000),
            reconnect_jitter: 0.1,
            ..WebSocketSettings::default()
        };
        let config = ReconnectConfig::from_websocket_settings(&settings);
        assert!((config.jitter_factor - 0.1).abs() < f64::EPSILON);

        let mut policy = ReconnectPolicy::new(config);
        for _ in 0..50 {
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn out_of_range_jitter_is_clamped() {
        let settings = |jitter| WebSocketSettings {
            reconnect_jitter: jitter,
            ..WebSocketSettings::default()
        };
        let config = ReconnectConfig::from_websocket_settings(&settings(4.0));
        assert!((config.jitter_factor - 1.0).abs() < f64::EPSILON);
        let config = ReconnectConfig::from_websocket_settings(&settings(f64::NAN));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        let config = ReconnectConfig::from_websocket_settings(&settings(-0.5));
        assert!(config.jitter_factor.abs() < f64::EPSILON);
    }
}
