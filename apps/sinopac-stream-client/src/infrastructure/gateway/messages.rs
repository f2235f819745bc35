//! Gateway Message Types
//!
//! Request and response shapes for the SinoPac quote gateway.
//!
//! # Outbound Envelope
//! ```json
//! {
//!   "api": "quote",
//!   "apiver": "1.0",
//!   "sn": 5,
//!   "token": "T1",
//!   "data": { "time": "20250102093000", "code": "AAPL.US" }
//! }
//! ```
//!
//! The auth request drops `token` and carries the device fingerprint at the
//! top level instead.
//!
//! # Inbound Envelope
//! ```json
//! {
//!   "api": "quote",
//!   "sn": 5,
//!   "data": { "rc": "000", "trendItems": [{ "code": "AAPL.US", "closePrice": "189.50" }] }
//! }
//! ```
//!
//! `sn` is absent on unsolicited pushes; `data.rc` may be absent on pushes
//! as well.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::market_data::{Market, QuoteFragment};
use crate::infrastructure::config::PermissionFlag;

/// Status code the gateway uses for success.
pub const RC_SUCCESS: &str = "000";

/// Status code the gateway uses for a server-side timeout.
pub const RC_TIMEOUT: &str = "408";

// =============================================================================
// API Kinds
// =============================================================================

/// Request / response kind carried in the `api` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiKind {
    /// Authentication handshake.
    Auth,
    /// Keep-alive.
    Heartbeat,
    /// One-shot snapshot.
    Quote,
    /// One-shot historical series.
    Trend,
    /// Push registration.
    Push,
    /// Unsolicited push update.
    Sync,
}

impl ApiKind {
    /// Get the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Heartbeat => "hb",
            Self::Quote => "quote",
            Self::Trend => "trend",
            Self::Push => "push",
            Self::Sync => "sync",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "auth" => Some(Self::Auth),
            "hb" | "heartbeat" => Some(Self::Heartbeat),
            "quote" => Some(Self::Quote),
            "trend" => Some(Self::Trend),
            "push" => Some(Self::Push),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    /// Whether requests of this kind are recorded in the ledger.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        !matches!(self, Self::Heartbeat | Self::Sync)
    }

    /// Whether a timed-out request of this kind is replayed.
    #[must_use]
    pub const fn is_replayable(&self) -> bool {
        matches!(self, Self::Quote | Self::Trend | Self::Push)
    }
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Status Codes
// =============================================================================

/// Outcome carried in `data.rc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusCode {
    /// `000`.
    Success,
    /// `408`, the gateway gave up waiting on its upstream.
    Timeout,
    /// Anything else.
    Failure(String),
}

impl StatusCode {
    /// Classify a wire code.
    #[must_use]
    pub fn from_wire(code: &str) -> Self {
        match code.trim() {
            RC_SUCCESS => Self::Success,
            RC_TIMEOUT => Self::Timeout,
            other => Self::Failure(other.to_string()),
        }
    }

    /// Get the wire code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => RC_SUCCESS,
            Self::Timeout => RC_TIMEOUT,
            Self::Failure(code) => code,
        }
    }

    /// Check for success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Outbound Requests
// =============================================================================

/// Push registration mode (`reset` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PushMode {
    /// Add to the active registration (`reset: "n"`).
    #[serde(rename = "n")]
    Additive,
    /// Replace the active registration (`reset: "y"`).
    #[serde(rename = "y")]
    Replace,
}

/// Data parameters of an auth request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthParams {
    /// Vendor auth key (blank for guest sessions).
    pub auth_key: String,
    /// US permission.
    #[serde(rename = "US")]
    pub us: PermissionFlag,
    /// Hong Kong permission.
    #[serde(rename = "HK")]
    pub hk: PermissionFlag,
    /// Taiwan permission.
    #[serde(rename = "TW")]
    pub tw: PermissionFlag,
}

/// Data parameters of a quote or trend request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeParams {
    /// Instrument code.
    pub code: String,
}

/// Data parameters of a push registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushParams {
    /// Market the registration applies to.
    pub qtype: Market,
    /// Additive or replacing.
    pub reset: PushMode,
    /// Instrument codes.
    pub codes: Vec<String>,
}

/// Data parameters of a heartbeat (none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HeartbeatParams {}

/// An outbound request before the envelope is stamped.
///
/// Kept verbatim in the ledger so a timed-out request can be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    /// Authentication handshake.
    Auth(AuthParams),
    /// Keep-alive.
    Heartbeat,
    /// One-shot snapshot for one code.
    Quote(CodeParams),
    /// One-shot historical series for one code.
    Trend(CodeParams),
    /// Push registration for one market.
    Push(PushParams),
}

impl GatewayRequest {
    /// Quote request for a code.
    #[must_use]
    pub fn quote(code: impl Into<String>) -> Self {
        Self::Quote(CodeParams { code: code.into() })
    }

    /// Trend request for a code.
    #[must_use]
    pub fn trend(code: impl Into<String>) -> Self {
        Self::Trend(CodeParams { code: code.into() })
    }

    /// Push registration for one market.
    #[must_use]
    pub const fn push(market: Market, mode: PushMode, codes: Vec<String>) -> Self {
        Self::Push(PushParams {
            qtype: market,
            reset: mode,
            codes,
        })
    }

    /// Get the request kind.
    #[must_use]
    pub const fn kind(&self) -> ApiKind {
        match self {
            Self::Auth(_) => ApiKind::Auth,
            Self::Heartbeat => ApiKind::Heartbeat,
            Self::Quote(_) => ApiKind::Quote,
            Self::Trend(_) => ApiKind::Trend,
            Self::Push(_) => ApiKind::Push,
        }
    }

    /// Instrument code for single-instrument requests.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Quote(p) | Self::Trend(p) => Some(&p.code),
            _ => None,
        }
    }

    /// Short human-readable description for diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Auth(_) => "auth".to_string(),
            Self::Heartbeat => "hb".to_string(),
            Self::Quote(p) => format!("quote {}", p.code),
            Self::Trend(p) => format!("trend {}", p.code),
            Self::Push(p) => format!(
                "push {} reset={} [{}]",
                p.qtype,
                match p.reset {
                    PushMode::Additive => "n",
                    PushMode::Replace => "y",
                },
                p.codes.join(",")
            ),
        }
    }
}

// =============================================================================
// Inbound Messages
// =============================================================================

/// Raw inbound envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    /// Response kind.
    pub api: String,
    /// Echoed sequence number (absent on pushes).
    #[serde(default, deserialize_with = "lenient_sn")]
    pub sn: Option<u64>,
    /// Payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Accept `sn` as either a JSON number or a numeric string.
fn lenient_sn<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Decoded payload of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Auth response.
    Auth {
        /// Session token (present on success).
        token: Option<String>,
    },
    /// Quote response or sync push.
    Quotes {
        /// Instruments that decoded.
        fragments: Vec<QuoteFragment>,
        /// Why each undecodable item was skipped.
        rejected: Vec<String>,
    },
    /// Trend response.
    Trend {
        /// Instrument code (may be blank; the request carries it too).
        code: String,
        /// Closing prices, oldest first.
        closes: Vec<Decimal>,
        /// Entries dropped because their close was unparsable.
        skipped: usize,
    },
    /// Heartbeat / push acknowledgements and other bodiless replies.
    Ack,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayMessage {
    /// Raw `api` field.
    pub api: String,
    /// Parsed kind (None for kinds the client does not model).
    pub kind: Option<ApiKind>,
    /// Echoed sequence number.
    pub sn: Option<u64>,
    /// Status code (absent on most pushes).
    pub status: Option<StatusCode>,
    /// Decoded payload.
    pub payload: Payload,
}

impl GatewayMessage {
    /// Check whether the frame is the auth response.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        self.kind == Some(ApiKind::Auth)
    }

    /// Check whether the status, if any, is success.
    #[must_use]
    pub fn is_success_or_unsigned(&self) -> bool {
        self.status.as_ref().is_none_or(StatusCode::is_success)
    }
}
