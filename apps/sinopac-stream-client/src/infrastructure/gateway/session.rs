//! Gateway Session State Machine
//!
//! All protocol logic of the client, with no I/O: the connection state, the
//! auth handshake, sequence numbering and the retry ledger, inbound dispatch,
//! the market data store, the push watchlist and the diagnostics log.
//!
//! Every entry point takes an event (transport opened, frame received, timer
//! fired, caller command) and returns the [`Action`]s the driver must carry
//! out: frames to write and timers to arm or cancel. The driver in
//! [`super::client`] owns the socket and the timers; this type owns
//! everything else. Because nothing here awaits, every transition is
//! serialized by whoever calls it.
//!
//! # Dispatch Rules
//!
//! - Frames whose envelope fails to inflate or parse are dropped with an
//!   error entry. An instrument inside a valid envelope that does not parse
//!   is skipped with a warning; the envelope still resolves its `sn`.
//! - The auth response is handled while `AuthPending`; every other frame is
//!   only logged until the session is `Authenticated`.
//! - A response `sn` resolves the ledger entry first; a payload is merged
//!   into the store only when its status is success or absent (pushes).

use chrono::{Local, Utc};

use super::auth::AuthHandler;
use super::codec::{GatewayCodec, InboundFrame, Stamp};
use super::ledger::{PendingRequest, Resolution, SequenceLedger};
use super::messages::{ApiKind, GatewayMessage, GatewayRequest, Payload, PushMode, StatusCode};
use crate::domain::connection::ConnectionState;
use crate::domain::diagnostics::{DEFAULT_LOG_CAPACITY, DiagnosticsLog, Severity};
use crate::domain::market_data::{MarketDataStore, MarketPartition};
use crate::domain::watchlist::Watchlist;
use crate::infrastructure::config::{
    ClientConfig, DEFAULT_API_VERSION, DeviceIdentity, MarketPermissions,
};
use crate::infrastructure::metrics::{self, RequestOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Static values the session stamps on requests.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `apiver` field.
    pub api_version: String,
    /// Device fingerprint for the auth request.
    pub identity: DeviceIdentity,
    /// Market permission flags for the auth request.
    pub permissions: MarketPermissions,
    /// `auth_key` for the auth request.
    pub auth_key: String,
    /// Diagnostics ring capacity.
    pub log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            identity: DeviceIdentity::default(),
            permissions: MarketPermissions::default(),
            auth_key: String::new(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Extract session values from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            api_version: config.gateway.api_version.clone(),
            identity: config.identity.clone(),
            permissions: config.permissions,
            auth_key: config.gateway.auth_key.clone(),
            log_capacity: config.log_capacity,
        }
    }
}

// =============================================================================
// Actions
// =============================================================================

/// A text frame ready to be written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Request kind.
    pub kind: ApiKind,
    /// Sequence number stamped on the frame.
    pub sn: u64,
    /// Encoded JSON.
    pub text: String,
}

/// Side effects the driver must perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write a frame.
    Send(OutboundFrame),
    /// Authentication succeeded.
    Authenticated,
    /// Start (or restart) the heartbeat timer.
    StartHeartbeat,
    /// Stop the heartbeat timer.
    StopHeartbeat,
    /// Replay the request after the retry delay.
    ScheduleRetry(PendingRequest),
    /// Cancel every pending replay.
    CancelRetries,
    /// Arm the reconnect timer.
    ScheduleReconnect,
    /// Cancel every timer (shutdown).
    CancelTimers,
}

// =============================================================================
// Session
// =============================================================================

/// Sans-IO gateway session.
///
/// # Example
///
/// ```rust
/// use sinopac_stream_client::domain::connection::ConnectionState;
/// use sinopac_stream_client::infrastructure::gateway::codec::InboundFrame;
/// use sinopac_stream_client::infrastructure::gateway::session::{Action, Session, SessionConfig};
///
/// let mut session = Session::new(SessionConfig::default());
/// assert!(session.begin_connect("wss://gateway.example"));
///
/// // Transport opened: the auth request goes out as sn 1.
/// let actions = session.on_open();
/// assert!(matches!(&actions[0], Action::Send(frame) if frame.sn == 1));
///
/// let reply = r#"{"api":"auth","sn":1,"data":{"rc":"000","token":"T1"}}"#;
/// let actions = session.on_frame(InboundFrame::Text(reply.to_string()));
/// assert!(actions.contains(&Action::StartHeartbeat));
/// assert_eq!(session.state(), ConnectionState::Authenticated);
/// assert_eq!(session.token(), Some("T1"));
/// ```
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    codec: GatewayCodec,
    state: ConnectionState,
    auth: AuthHandler,
    ledger: SequenceLedger,
    store: MarketDataStore,
    watchlist: Watchlist,
    log: DiagnosticsLog,
    log_generation: u64,
}

impl Session {
    /// Create a disconnected session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let auth = AuthHandler::new(
            config.identity.clone(),
            config.permissions,
            config.auth_key.clone(),
        );
        let log = DiagnosticsLog::new(config.log_capacity);

        Self {
            config,
            codec: GatewayCodec::new(),
            state: ConnectionState::Disconnected,
            auth,
            ledger: SequenceLedger::new(),
            store: MarketDataStore::new(),
            watchlist: Watchlist::new(),
            log,
            log_generation: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Read access
    // -------------------------------------------------------------------------

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session token, present only while authenticated.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.auth.token()
    }

    /// Market data store.
    #[must_use]
    pub const fn store(&self) -> &MarketDataStore {
        &self.store
    }

    /// Pending-request ledger.
    #[must_use]
    pub const fn ledger(&self) -> &SequenceLedger {
        &self.ledger
    }

    /// Push registrations restored after every re-authentication.
    #[must_use]
    pub const fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    /// Diagnostics log.
    #[must_use]
    pub const fn diagnostics(&self) -> &DiagnosticsLog {
        &self.log
    }

    /// Counter bumped on every diagnostics append.
    #[must_use]
    pub const fn diagnostics_generation(&self) -> u64 {
        self.log_generation
    }

    // -------------------------------------------------------------------------
    // Transport lifecycle
    // -------------------------------------------------------------------------

    /// `Disconnected → Connecting`.
    ///
    /// Returns `false` (and changes nothing) in any other state, so repeated
    /// connect triggers are harmless.
    pub fn begin_connect(&mut self, url: &str) -> bool {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = %self.state, "Connect ignored, not disconnected");
            return false;
        }

        self.set_state(ConnectionState::Connecting);
        self.note(Severity::Info, format!("connecting to {url}"));
        true
    }

    /// `Connecting → AuthPending`: reset numbering and send the auth request.
    pub fn on_open(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();

        self.ledger.reset();
        self.auth.reset();
        self.set_state(ConnectionState::AuthPending);
        self.note(Severity::Info, "transport open, sending auth request");

        let request = self.auth.create_auth_request();
        self.transmit(request, 0, &mut actions);
        actions
    }

    /// Transport failed to open, errored or closed.
    ///
    /// Outside of a requested shutdown this clears the token and the ledger,
    /// stops the heartbeat and asks for a reconnect.
    pub fn on_transport_lost(&mut self, reason: &str) -> Vec<Action> {
        match self.state {
            ConnectionState::Disconnected => return Vec::new(),
            ConnectionState::Closing => {
                self.on_closed();
                return Vec::new();
            }
            _ => {}
        }

        self.auth.reset();
        self.ledger.reset();
        metrics::set_pending_requests(0);
        self.set_state(ConnectionState::Disconnected);
        self.note(Severity::Warn, format!("connection lost: {reason}"));

        vec![
            Action::StopHeartbeat,
            Action::CancelRetries,
            Action::ScheduleReconnect,
        ]
    }

    /// Begin a requested shutdown: no reconnect follows.
    pub fn close(&mut self) -> Vec<Action> {
        self.auth.reset();
        self.ledger.reset();
        metrics::set_pending_requests(0);
        self.set_state(ConnectionState::Closing);
        self.note(Severity::Info, "closing connection");
        vec![Action::CancelTimers]
    }

    /// `Closing → Disconnected` once the transport is released.
    pub fn on_closed(&mut self) {
        if self.state == ConnectionState::Closing {
            self.set_state(ConnectionState::Disconnected);
            self.note(Severity::Info, "connection closed");
        }
    }

    // -------------------------------------------------------------------------
    // Inbound
    // -------------------------------------------------------------------------

    /// Decode and dispatch one inbound frame.
    pub fn on_frame(&mut self, frame: InboundFrame) -> Vec<Action> {
        let encoding = frame.encoding();
        let message = match self.codec.decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_decode_failure(encoding);
                self.note(Severity::Error, format!("dropped {encoding} frame: {e}"));
                return Vec::new();
            }
        };

        metrics::record_frame_received(message.kind.map_or("other", |k| k.as_str()), encoding);

        if message.is_auth() {
            return self.on_auth_response(message);
        }

        if !self.state.is_authenticated() {
            self.note(
                Severity::Info,
                format!("ignored {} frame while {}", message.api, self.state),
            );
            return Vec::new();
        }

        let mut actions = Vec::new();
        let resolved = match (message.sn, &message.status) {
            (Some(sn), Some(status)) => self.resolve(sn, status, &mut actions),
            _ => None,
        };

        if message.is_success_or_unsigned() {
            self.apply_payload(message.payload, resolved.as_ref());
        }

        actions
    }

    fn on_auth_response(&mut self, message: GatewayMessage) -> Vec<Action> {
        if self.state != ConnectionState::AuthPending {
            self.note(
                Severity::Warn,
                format!("unexpected auth response while {}", self.state),
            );
            return Vec::new();
        }

        if let (Some(sn), Some(status)) = (message.sn, &message.status) {
            self.resolve_auth(sn, status);
        }

        let token = match message.payload {
            Payload::Auth { token } => token,
            _ => None,
        };

        let outcome = self
            .auth
            .on_response(message.status.as_ref(), token)
            .map(|_| ());

        match outcome {
            Ok(()) => {
                self.set_state(ConnectionState::Authenticated);
                self.note(Severity::Info, "authenticated");

                let mut actions = vec![Action::Authenticated, Action::StartHeartbeat];
                self.restore_watchlist(&mut actions);
                actions
            }
            Err(e) => {
                self.note(Severity::Error, format!("authentication failed: {e}"));
                Vec::new()
            }
        }
    }

    /// Auth is never replayed; its outcome is only measured here and judged
    /// by the handshake.
    fn resolve_auth(&mut self, sn: u64, status: &StatusCode) {
        let (entry, outcome) = match self.ledger.resolve(sn, status) {
            Resolution::Untracked => {
                tracing::debug!(sn, rc = %status, "Auth response for untracked sequence number");
                return;
            }
            Resolution::Completed(entry) => (entry, RequestOutcome::Success),
            Resolution::Replay(entry) | Resolution::Exhausted(entry) => {
                (entry, RequestOutcome::Timeout)
            }
            Resolution::Failed(entry, _) => (entry, RequestOutcome::Failure),
        };

        metrics::set_pending_requests(self.ledger.len());
        metrics::record_request_outcome(
            entry.request.kind().as_str(),
            outcome,
            entry.submitted_at.elapsed(),
        );
    }

    /// Resolve a response against the ledger. Returns the completed request.
    fn resolve(
        &mut self,
        sn: u64,
        status: &StatusCode,
        actions: &mut Vec<Action>,
    ) -> Option<GatewayRequest> {
        let resolution = self.ledger.resolve(sn, status);
        metrics::set_pending_requests(self.ledger.len());

        match resolution {
            Resolution::Untracked => {
                tracing::trace!(sn, rc = %status, "Response for untracked sequence number");
                None
            }
            Resolution::Completed(entry) => {
                metrics::record_request_outcome(
                    entry.request.kind().as_str(),
                    RequestOutcome::Success,
                    entry.submitted_at.elapsed(),
                );
                Some(entry.request)
            }
            Resolution::Replay(entry) => {
                metrics::record_request_outcome(
                    entry.request.kind().as_str(),
                    RequestOutcome::Timeout,
                    entry.submitted_at.elapsed(),
                );
                self.note(
                    Severity::Warn,
                    format!("{} (sn={sn}) timed out, replay scheduled", entry.request.describe()),
                );
                actions.push(Action::ScheduleRetry(entry));
                None
            }
            Resolution::Exhausted(entry) => {
                metrics::record_request_outcome(
                    entry.request.kind().as_str(),
                    RequestOutcome::Timeout,
                    entry.submitted_at.elapsed(),
                );
                self.note(
                    Severity::Error,
                    format!("{} (sn={sn}) timed out again, giving up", entry.request.describe()),
                );
                None
            }
            Resolution::Failed(entry, code) => {
                metrics::record_request_outcome(
                    entry.request.kind().as_str(),
                    RequestOutcome::Failure,
                    entry.submitted_at.elapsed(),
                );
                self.note(
                    Severity::Error,
                    format!("{} (sn={sn}) failed with rc={code}", entry.request.describe()),
                );
                None
            }
        }
    }

    fn apply_payload(&mut self, payload: Payload, request: Option<&GatewayRequest>) {
        let now = Utc::now();
        let fallback = request.and_then(GatewayRequest::code);

        match payload {
            Payload::Quotes {
                fragments,
                rejected,
            } => {
                for reason in rejected {
                    self.note(Severity::Warn, format!("skipped instrument {reason}"));
                }
                for mut fragment in fragments {
                    if fragment.code.trim().is_empty() {
                        if let Some(code) = fallback {
                            fragment.code = code.to_string();
                        }
                    }
                    if !self.store.merge_snapshot(fragment, now) {
                        self.note(Severity::Warn, "dropped snapshot fragment without code");
                    }
                }
                metrics::set_instruments(self.store.len());
            }
            Payload::Trend {
                code,
                closes,
                skipped,
            } => {
                let code = if code.is_empty() {
                    fallback.unwrap_or_default().to_string()
                } else {
                    code
                };

                if skipped > 0 {
                    self.note(
                        Severity::Warn,
                        format!("trend {code}: skipped {skipped} unparsable closes"),
                    );
                }
                if self.store.merge_history(&code, closes, now) {
                    metrics::set_instruments(self.store.len());
                } else {
                    self.note(Severity::Warn, "dropped trend without code");
                }
            }
            Payload::Auth { .. } | Payload::Ack => {}
        }
    }

    // -------------------------------------------------------------------------
    // Outbound
    // -------------------------------------------------------------------------

    /// Send a request if the transport is open; otherwise log and drop it.
    pub fn send(&mut self, request: GatewayRequest) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.state.is_open() {
            self.note(
                Severity::Warn,
                format!("dropped {}: transport not open", request.describe()),
            );
            return actions;
        }

        self.transmit(request, 0, &mut actions);
        actions
    }

    /// Heartbeat tick. Stale ticks outside `Authenticated` are ignored.
    pub fn heartbeat(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.state.is_authenticated() {
            self.transmit(GatewayRequest::Heartbeat, 0, &mut actions);
        }
        actions
    }

    /// Replay a request the gateway timed out, under a fresh sequence number.
    pub fn replay(&mut self, pending: PendingRequest) -> Vec<Action> {
        let mut actions = Vec::new();
        let description = pending.request.describe();

        if !self.state.is_authenticated() {
            self.note(
                Severity::Warn,
                format!("dropped replay of {description}: not authenticated"),
            );
            return actions;
        }

        metrics::record_replay(pending.request.kind().as_str());
        self.note(
            Severity::Info,
            format!("replaying {description} (was sn={})", pending.sn),
        );
        self.transmit(pending.request, pending.attempt.saturating_add(1), &mut actions);
        actions
    }

    /// Additive push registration (`reset: "n"`).
    pub fn subscribe(&mut self, codes: &[String]) -> Vec<Action> {
        self.register(codes, PushMode::Additive, "subscribe")
    }

    /// Replacing push registration (`reset: "y"`) for the markets the codes
    /// belong to.
    pub fn subscribe_replacing(&mut self, codes: &[String]) -> Vec<Action> {
        self.register(codes, PushMode::Replace, "subscribe_replacing")
    }

    /// Quote and trend for every code, then one additive push per market.
    pub fn init_watch(&mut self, codes: &[String]) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.state.is_authenticated() {
            self.note(
                Severity::Warn,
                format!("init_watch ignored: {}", self.state),
            );
            return actions;
        }

        let partition = MarketPartition::from_codes(codes);
        self.warn_unrecognized(&partition.unrecognized);

        let one_shot: Vec<String> = partition
            .by_market
            .values()
            .flatten()
            .chain(partition.unrecognized.iter())
            .cloned()
            .collect();

        if one_shot.is_empty() {
            self.note(Severity::Warn, "init_watch called without codes");
            return actions;
        }

        for code in one_shot {
            self.transmit(GatewayRequest::quote(code.clone()), 0, &mut actions);
            self.transmit(GatewayRequest::trend(code), 0, &mut actions);
        }

        for (market, codes) in partition.by_market {
            self.watchlist.add(market, &codes);
            self.transmit(
                GatewayRequest::push(market, PushMode::Additive, codes),
                0,
                &mut actions,
            );
        }

        actions
    }

    fn register(&mut self, codes: &[String], mode: PushMode, op: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.state.is_authenticated() {
            self.note(Severity::Warn, format!("{op} ignored: {}", self.state));
            return actions;
        }

        let partition = MarketPartition::from_codes(codes);
        self.warn_unrecognized(&partition.unrecognized);
        if partition.is_empty() {
            self.note(Severity::Warn, format!("{op} called without usable codes"));
            return actions;
        }

        for (market, codes) in partition.by_market {
            match mode {
                PushMode::Additive => {
                    self.watchlist.add(market, &codes);
                }
                PushMode::Replace => self.watchlist.replace(market, &codes),
            }
            self.transmit(GatewayRequest::push(market, mode, codes), 0, &mut actions);
        }

        actions
    }

    fn restore_watchlist(&mut self, actions: &mut Vec<Action>) {
        let registrations: Vec<_> = self
            .watchlist
            .iter()
            .map(|(market, codes)| (market, codes.to_vec()))
            .collect();

        if registrations.is_empty() {
            return;
        }

        let count = registrations.len();
        for (market, codes) in registrations {
            self.transmit(
                GatewayRequest::push(market, PushMode::Additive, codes),
                0,
                actions,
            );
        }
        self.note(
            Severity::Info,
            format!("restored push registrations for {count} market(s)"),
        );
    }

    fn warn_unrecognized(&mut self, codes: &[String]) {
        if !codes.is_empty() {
            self.note(
                Severity::Warn,
                format!("no market suffix for [{}], skipped from push", codes.join(",")),
            );
        }
    }

    /// Stamp, encode and record a request.
    fn transmit(&mut self, request: GatewayRequest, attempt: u8, actions: &mut Vec<Action>) {
        let sn = self.ledger.allocate();
        let stamp = Stamp {
            sn,
            token: self.auth.token(),
            api_version: &self.config.api_version,
            identity: self.auth.identity(),
            time: Local::now().naive_local(),
        };

        match self.codec.encode(&request, stamp) {
            Ok(text) => {
                let kind = request.kind();
                if kind == ApiKind::Heartbeat {
                    tracing::trace!(sn, "Sending heartbeat");
                } else {
                    tracing::debug!(sn, request = %request.describe(), attempt, "Sending request");
                }

                self.ledger.record(sn, request, attempt);
                metrics::record_request_sent(kind.as_str());
                metrics::set_pending_requests(self.ledger.len());
                actions.push(Action::Send(OutboundFrame { kind, sn, text }));
            }
            Err(e) => {
                self.note(
                    Severity::Error,
                    format!("failed to encode {}: {e}", request.describe()),
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Connection state change");
        }
        self.state = state;
        metrics::set_connection_state(state);
    }

    /// Append a diagnostics entry and mirror it to `tracing`.
    fn note(&mut self, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => tracing::info!("{message}"),
            Severity::Warn => tracing::warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
        self.log.push(severity, message);
        self.log_generation += 1;
    }
}
