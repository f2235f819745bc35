//! SinoPac Quote Gateway Adapter
//!
//! Implements the client side of the gateway's JSON-over-WebSocket protocol:
//!
//! - **messages / codec**: request envelopes out, text or gzip frames in
//! - **auth**: handshake and token tracking
//! - **ledger**: sequence numbers and the one-shot timeout replay
//! - **heartbeat / timer / reconnect**: the client's timers
//! - **session**: the sans-IO state machine tying the above together
//! - **client**: the Tokio driver owning the socket, and its handle

pub mod auth;
pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod ledger;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod timer;

pub use auth::{AuthError, AuthHandler};
pub use client::{GatewayClient, GatewayClientConfig, GatewayClientError, GatewayHandle};
pub use codec::{CodecError, GatewayCodec, InboundFrame, Stamp};
pub use heartbeat::{HeartbeatConfig, HeartbeatScheduler};
pub use ledger::{PendingRequest, Resolution, SequenceLedger};
pub use messages::{
    ApiKind, GatewayMessage, GatewayRequest, Payload, PushMode, StatusCode,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use session::{Action, OutboundFrame, Session, SessionConfig};
pub use timer::TimerHandle;
