//! Connection Lifecycle
//!
//! ```text
//! Disconnected → Connecting → AuthPending → Authenticated → Closing → Disconnected
//!       ↑             │             │              │
//!       └─────────────┴─────────────┴──────────────┘  transport error / close
//!                         (reconnect after delay)
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of the single gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport.
    #[default]
    Disconnected,
    /// Transport open in progress.
    Connecting,
    /// Transport open, auth request sent.
    AuthPending,
    /// Token held; requests may be sent.
    Authenticated,
    /// Shutdown requested; no reconnect will follow.
    Closing,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
        }
    }

    /// Check if requests may be sent on behalf of callers.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    /// Check if the transport is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::AuthPending | Self::Authenticated)
    }

    /// Numeric code for the connection state gauge.
    #[must_use]
    pub const fn gauge_value(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::AuthPending => 2.0,
            Self::Authenticated => 3.0,
            Self::Closing => 4.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection status as published to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful authentication.
    pub reconnect_attempts: u32,
    /// When `state` last changed.
    pub since: DateTime<Utc>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Disconnected, 0)
    }
}

impl ConnectionStatus {
    /// Status entered now.
    #[must_use]
    pub fn new(state: ConnectionState, reconnect_attempts: u32) -> Self {
        Self {
            state,
            reconnect_attempts,
            since: Utc::now(),
        }
    }

    /// Shorthand for `state.is_authenticated()`.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_states() {
        assert!(ConnectionState::AuthPending.is_open());
        assert!(ConnectionState::Authenticated.is_open());
        assert!(!ConnectionState::Connecting.is_open());
        assert!(!ConnectionState::Closing.is_open());
        assert!(!ConnectionState::AuthPending.is_authenticated());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::AuthPending).unwrap(),
            "\"auth_pending\""
        );
        assert_eq!(ConnectionState::Authenticated.to_string(), "authenticated");
    }
}
