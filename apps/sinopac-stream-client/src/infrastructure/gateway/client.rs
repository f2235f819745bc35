//! Gateway Client Driver
//!
//! Owns the WebSocket transport and the timers, and feeds every event into
//! the sans-IO [`Session`]. One task runs the event loop; callers talk to it
//! through a cloneable [`GatewayHandle`].
//!
//! # Event Loop
//!
//! ```text
//!   GatewayHandle ──commands──┐
//!   timers ───────events──────┼──► select! ──► Session ──► actions ──► socket / timers
//!   socket ───────frames──────┘                   │
//!                                                 └──► watch channels (status, quotes, diagnostics)
//! ```
//!
//! Timer events for a replay carry the connection epoch they were armed on;
//! a replay that fires after the connection it belongs to was replaced is
//! discarded.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::InboundFrame;
use super::heartbeat::{HeartbeatConfig, HeartbeatScheduler};
use super::ledger::PendingRequest;
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::session::{Action, Session, SessionConfig};
use super::timer::TimerHandle;
use crate::application::ports::{FeedError, QuoteFeed};
use crate::domain::connection::ConnectionStatus;
use crate::domain::diagnostics::LogEntry;
use crate::domain::market_data::MarketSnapshot;
use crate::infrastructure::config::{ClientConfig, DEFAULT_GATEWAY_URL};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end the gateway client task.
#[derive(Debug, thiserror::Error)]
pub enum GatewayClientError {
    /// The reconnect policy gave up.
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// Values stamped on requests.
    pub session: SessionConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Delay before replaying a request the gateway timed out.
    pub retry_delay: Duration,
    /// Transport open timeout.
    pub connect_timeout: Duration,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_GATEWAY_URL)
    }
}

impl GatewayClientConfig {
    /// Create a configuration with default timers.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: SessionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Create configuration from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.gateway.url.clone(),
            session: SessionConfig::from_config(config),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            retry_delay: config.websocket.retry_delay,
            connect_timeout: config.websocket.connect_timeout,
        }
    }
}

// =============================================================================
// Commands & Events
// =============================================================================

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    SubscribeReplacing(Vec<String>),
    InitWatch {
        codes: Vec<String>,
        accepted: Option<oneshot::Sender<bool>>,
    },
    Close,
}

#[derive(Debug, Clone)]
enum Event {
    Heartbeat,
    Retry { epoch: u64, pending: PendingRequest },
    Reconnect,
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running gateway client.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    market: watch::Receiver<MarketSnapshot>,
    diagnostics: watch::Receiver<Arc<Vec<LogEntry>>>,
}

impl GatewayHandle {
    fn command(&self, command: Command) -> Result<(), FeedError> {
        self.commands.send(command).map_err(|_| FeedError::Closed)
    }

    /// Ask the client to close the connection and stop.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the client already stopped.
    pub fn close(&self) -> Result<(), FeedError> {
        self.command(Command::Close)
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Wait until the connection is authenticated.
    ///
    /// Returns immediately if it already is.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the client stops first.
    pub async fn authenticated(&self) -> Result<(), FeedError> {
        let mut status = self.status.clone();
        status
            .wait_for(ConnectionStatus::is_authenticated)
            .await
            .map(|_| ())
            .map_err(|_| FeedError::Closed)
    }

    /// Issue `init_watch` once a session is authenticated, and again after
    /// the next authentication if the session was lost before the command
    /// reached it.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the client stops first.
    pub async fn init_watch_when_authenticated(&self, codes: Vec<String>) -> Result<(), FeedError> {
        loop {
            self.authenticated().await?;

            let (tx, rx) = oneshot::channel();
            self.command(Command::InitWatch {
                codes: codes.clone(),
                accepted: Some(tx),
            })?;
            if rx.await.map_err(|_| FeedError::Closed)? {
                return Ok(());
            }
            tracing::debug!("Initial watch arrived between sessions, waiting for the next one");
        }
    }
}

impl QuoteFeed for GatewayHandle {
    fn connection_status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    fn market_data(&self) -> MarketSnapshot {
        self.market.borrow().clone()
    }

    fn diagnostics(&self) -> Arc<Vec<LogEntry>> {
        self.diagnostics.borrow().clone()
    }

    fn subscribe(&self, codes: Vec<String>) -> Result<(), FeedError> {
        self.command(Command::Subscribe(codes))
    }

    fn subscribe_replacing(&self, codes: Vec<String>) -> Result<(), FeedError> {
        self.command(Command::SubscribeReplacing(codes))
    }

    fn init_watch(&self, codes: Vec<String>) -> Result<(), FeedError> {
        self.command(Command::InitWatch {
            codes,
            accepted: None,
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Gateway WebSocket client.
///
/// Manages the connection lifecycle including:
/// - Authentication on every transport open
/// - Heartbeats while authenticated
/// - Replay of requests the gateway timed out
/// - Automatic reconnection
pub struct GatewayClient {
    config: GatewayClientConfig,
    session: Session,
    cancel: CancellationToken,
    commands: mpsc::UnboundedReceiver<Command>,
    commands_open: bool,
    events_tx: mpsc::UnboundedSender<Event>,
    events: mpsc::UnboundedReceiver<Event>,
    socket: Option<WsStream>,
    epoch: u64,
    heartbeat: HeartbeatScheduler,
    retries: Vec<TimerHandle>,
    reconnect_timer: TimerHandle,
    reconnect: ReconnectPolicy,
    exhausted: Option<u32>,
    status_tx: watch::Sender<ConnectionStatus>,
    market_tx: watch::Sender<MarketSnapshot>,
    diagnostics_tx: watch::Sender<Arc<Vec<LogEntry>>>,
    published_store: u64,
    published_log: u64,
}

impl GatewayClient {
    /// Create a client and the handle that talks to it.
    #[must_use]
    pub fn new(config: GatewayClientConfig, cancel: CancellationToken) -> (Self, GatewayHandle) {
        let session = Session::new(config.session.clone());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (market_tx, market) = watch::channel(session.store().snapshot());
        let (diagnostics_tx, diagnostics) = watch::channel(Arc::new(Vec::new()));

        let handle = GatewayHandle {
            commands: commands_tx,
            status,
            market,
            diagnostics,
        };

        let client = Self {
            heartbeat: HeartbeatScheduler::new(config.heartbeat.clone()),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            config,
            session,
            cancel,
            commands,
            commands_open: true,
            events_tx,
            events,
            socket: None,
            epoch: 0,
            retries: Vec::new(),
            reconnect_timer: TimerHandle::new(),
            exhausted: None,
            status_tx,
            market_tx,
            diagnostics_tx,
            published_store: 0,
            published_log: 0,
        };

        (client, handle)
    }

    /// Create a client and run it on a new task.
    #[must_use]
    pub fn spawn(
        config: GatewayClientConfig,
        cancel: CancellationToken,
    ) -> (GatewayHandle, JoinHandle<Result<(), GatewayClientError>>) {
        let (client, handle) = Self::new(config, cancel);
        (handle, tokio::spawn(client.run()))
    }

    /// Run the event loop until cancelled, closed, or out of reconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconnect policy gives up.
    pub async fn run(mut self) -> Result<(), GatewayClientError> {
        tracing::info!(url = %self.config.url, "Starting gateway client");
        self.connect().await;
        self.publish();

        loop {
            if let Some(attempts) = self.exhausted {
                tracing::error!(attempts, "Giving up on the quote gateway");
                self.shutdown().await;
                return Err(ReconnectError::MaxAttemptsExceeded(attempts).into());
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::info!("Gateway client cancelled");
                    break;
                }
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(Command::Close) => break,
                    Some(command) => self.handle_command(command).await,
                    None => self.commands_open = false,
                },
                Some(event) = self.events.recv() => self.handle_event(event).await,
                frame = next_frame(self.socket.as_mut()) => self.handle_frame(frame).await,
            }

            self.publish();
        }

        self.shutdown().await;
        Ok(())
    }

    async fn connect(&mut self) {
        if !self.session.begin_connect(&self.config.url) {
            return;
        }
        self.publish();

        let timeout = self.config.connect_timeout;
        let opened = tokio::select! {
            () = self.cancel.cancelled() => return,
            result = tokio::time::timeout(
                timeout,
                tokio_tungstenite::connect_async(self.config.url.as_str()),
            ) => result,
        };

        match opened {
            Ok(Ok((socket, _response))) => {
                tracing::info!(url = %self.config.url, "Gateway transport open");
                self.socket = Some(socket);
                self.epoch += 1;
                let actions = self.session.on_open();
                self.dispatch(actions).await;
            }
            Ok(Err(e)) => self.transport_lost(&format!("connect failed: {e}")),
            Err(_) => self.transport_lost(&format!("connect timed out after {timeout:?}")),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let actions = match command {
            Command::Subscribe(codes) => self.session.subscribe(&codes),
            Command::SubscribeReplacing(codes) => self.session.subscribe_replacing(&codes),
            Command::InitWatch { codes, accepted } => {
                let authenticated = self.session.state().is_authenticated();
                let actions = self.session.init_watch(&codes);
                if let Some(accepted) = accepted {
                    let _ = accepted.send(authenticated);
                }
                actions
            }
            Command::Close => return,
        };
        self.dispatch(actions).await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Heartbeat => {
                let actions = self.session.heartbeat();
                self.dispatch(actions).await;
            }
            Event::Retry { epoch, pending } => {
                if epoch != self.epoch {
                    tracing::debug!(sn = pending.sn, "Discarding replay from a previous connection");
                    return;
                }
                let actions = self.session.replay(pending);
                self.dispatch(actions).await;
            }
            Event::Reconnect => self.connect().await,
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Message, tungstenite::Error>>) {
        match frame {
            Some(Ok(Message::Text(text))) => {
                let actions = self.session.on_frame(InboundFrame::Text(text.as_str().to_owned()));
                self.dispatch(actions).await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                let actions = self.session.on_frame(InboundFrame::Binary(bytes.to_vec()));
                self.dispatch(actions).await;
            }
            Some(Ok(Message::Ping(data))) => {
                if let Some(socket) = self.socket.as_mut() {
                    if let Err(e) = socket.send(Message::Pong(data)).await {
                        self.transport_lost(&format!("pong failed: {e}"));
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map_or_else(
                    || "server sent close frame".to_string(),
                    |f| {
                        format!(
                            "server sent close frame ({}: {})",
                            u16::from(f.code),
                            f.reason.as_str()
                        )
                    },
                );
                self.transport_lost(&reason);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => self.transport_lost(&e.to_string()),
            None => self.transport_lost("stream ended"),
        }
    }

    /// Carry out session actions; a failed write counts as transport loss.
    async fn dispatch(&mut self, actions: Vec<Action>) {
        if let Err(e) = self.perform(actions).await {
            self.transport_lost(&format!("send failed: {e}"));
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) -> Result<(), tungstenite::Error> {
        for action in actions {
            match action {
                Action::Send(frame) => {
                    let Some(socket) = self.socket.as_mut() else {
                        tracing::debug!(sn = frame.sn, "No transport, frame dropped");
                        continue;
                    };
                    socket.send(Message::Text(frame.text.into())).await?;
                }
                other => self.schedule(other),
            }
        }
        Ok(())
    }

    fn schedule(&mut self, action: Action) {
        match action {
            Action::Send(frame) => {
                tracing::debug!(sn = frame.sn, "No transport, frame dropped");
            }
            Action::Authenticated => self.reconnect.reset(),
            Action::StartHeartbeat => self.heartbeat.start(&self.events_tx, Event::Heartbeat),
            Action::StopHeartbeat => self.heartbeat.stop(),
            Action::ScheduleRetry(pending) => {
                self.retries.retain(TimerHandle::is_armed);
                let mut timer = TimerHandle::new();
                timer.arm_once(
                    self.config.retry_delay,
                    &self.events_tx,
                    Event::Retry {
                        epoch: self.epoch,
                        pending,
                    },
                );
                self.retries.push(timer);
            }
            Action::CancelRetries => self.retries.clear(),
            Action::ScheduleReconnect => match self.reconnect.next_delay() {
                Some(delay) => {
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = self.reconnect.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting to quote gateway"
                    );
                    self.reconnect_timer
                        .arm_once(delay, &self.events_tx, Event::Reconnect);
                }
                None => self.exhausted = Some(self.reconnect.attempt_count()),
            },
            Action::CancelTimers => {
                self.heartbeat.stop();
                self.retries.clear();
                self.reconnect_timer.cancel();
            }
        }
    }

    fn transport_lost(&mut self, reason: &str) {
        self.socket = None;
        for action in self.session.on_transport_lost(reason) {
            self.schedule(action);
        }
    }

    async fn shutdown(&mut self) {
        for action in self.session.close() {
            self.schedule(action);
        }

        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.close(None).await {
                tracing::debug!(error = %e, "Error closing gateway transport");
            }
        }

        self.session.on_closed();
        self.publish();
        tracing::info!("Gateway client stopped");
    }

    /// Push changed state to the watch channels.
    fn publish(&mut self) {
        let state = self.session.state();
        let attempts = self.reconnect.attempt_count();
        self.status_tx.send_if_modified(|status| {
            if status.state == state && status.reconnect_attempts == attempts {
                return false;
            }
            if status.state != state {
                *status = ConnectionStatus::new(state, attempts);
            } else {
                status.reconnect_attempts = attempts;
            }
            true
        });

        let generation = self.session.store().generation();
        if generation != self.published_store {
            self.published_store = generation;
            self.market_tx.send_replace(self.session.store().snapshot());
        }

        let generation = self.session.diagnostics_generation();
        if generation != self.published_log {
            self.published_log = generation;
            self.diagnostics_tx
                .send_replace(Arc::new(self.session.diagnostics().snapshot()));
        }
    }
}

async fn next_frame(socket: Option<&mut WsStream>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("url", &self.config.url)
            .field("state", &self.session.state())
            .field("epoch", &self.epoch)
            .field("connected", &self.socket.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::ConnectionState;
    use crate::infrastructure::config::WebSocketSettings;

    #[test]
    fn config_from_client_config() {
        let mut client = ClientConfig::default();
        client.gateway.url = "wss://quotes.example:8633/".to_string();
        client.websocket = WebSocketSettings {
            retry_delay: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            ..WebSocketSettings::default()
        };

        let config = GatewayClientConfig::from_config(&client);
        assert_eq!(config.url, "wss://quotes.example:8633/");
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
        assert_eq!(config.session.log_capacity, client.log_capacity);
    }

    #[test]
    fn handle_reports_closed_once_client_is_gone() {
        let (client, handle) = GatewayClient::new(
            GatewayClientConfig::new("ws://127.0.0.1:1"),
            CancellationToken::new(),
        );
        assert_eq!(handle.connection_status().state, ConnectionState::Disconnected);
        assert!(handle.market_data().is_empty());

        let mut waiting = tokio_test::task::spawn(handle.authenticated());
        tokio_test::assert_pending!(waiting.poll());

        drop(client);
        assert!(waiting.is_woken());
        assert_eq!(
            tokio_test::assert_ready!(waiting.poll()),
            Err(FeedError::Closed)
        );
        drop(waiting);

        assert_eq!(handle.subscribe(vec!["AAPL.US".into()]), Err(FeedError::Closed));
        assert_eq!(handle.close(), Err(FeedError::Closed));
    }

    #[tokio::test]
    async fn gives_up_after_max_reconnect_attempts() {
        let mut config = GatewayClientConfig::new("ws://127.0.0.1:1");
        config.reconnect = ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::fixed(Duration::from_millis(10))
        };
        config.connect_timeout = Duration::from_secs(2);

        let (handle, task) = GatewayClient::spawn(config, CancellationToken::new());
        let result = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(
            result,
            Err(GatewayClientError::Reconnect(ReconnectError::MaxAttemptsExceeded(2)))
        ));
        assert_eq!(handle.connection_status().state, ConnectionState::Disconnected);
        assert!(
            handle
                .diagnostics()
                .iter()
                .any(|e| e.message.contains("connection lost"))
        );
    }

    #[tokio::test]
    async fn cancellation_stops_the_client() {
        let cancel = CancellationToken::new();
        let mut config = GatewayClientConfig::new("ws://127.0.0.1:1");
        config.reconnect = ReconnectConfig::fixed(Duration::from_secs(60));

        let (_handle, task) = GatewayClient::spawn(config, cancel.clone());
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn init_watch_between_sessions_is_not_accepted() {
        let (mut client, _handle) = GatewayClient::new(
            GatewayClientConfig::new("ws://127.0.0.1:1"),
            CancellationToken::new(),
        );

        let (tx, rx) = oneshot::channel();
        client
            .handle_command(Command::InitWatch {
                codes: vec!["AAPL.US".to_string()],
                accepted: Some(tx),
            })
            .await;

        assert!(!rx.await.unwrap());
        assert!(
            client
                .session
                .diagnostics()
                .snapshot()
                .iter()
                .any(|e| e.message.starts_with("init_watch ignored"))
        );
    }
}
