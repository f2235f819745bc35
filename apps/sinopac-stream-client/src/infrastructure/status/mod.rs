//! Status HTTP Endpoint
//!
//! Read-only HTTP surface over a [`QuoteFeed`]: connection health, the market
//! data snapshot, the diagnostics log and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status (503 unless authenticated)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks authentication)
//! - `GET /quotes` - Every tracked instrument, keyed by code
//! - `GET /quotes/{code}` - One instrument (404 if unknown)
//! - `GET /diagnostics` - Diagnostics log, oldest first
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteFeed;
use crate::domain::connection::{ConnectionState, ConnectionStatus};
use crate::domain::diagnostics::Severity;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Gateway connection status.
    pub connection: ConnectionInfo,
    /// Instruments in the market data store.
    pub instruments: usize,
    /// Diagnostics log summary.
    pub diagnostics: DiagnosticsSummary,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Authenticated with the gateway.
    Healthy,
    /// Connecting or authenticating.
    Degraded,
    /// No transport.
    Unhealthy,
}

impl HealthStatus {
    /// Map a connection state to a health status.
    #[must_use]
    pub const fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Authenticated => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::AuthPending => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Closing => Self::Unhealthy,
        }
    }
}

/// Gateway connection details.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether requests may be sent.
    pub authenticated: bool,
    /// Reconnect attempts since the last authentication.
    pub reconnect_attempts: u32,
    /// When the state last changed.
    pub since: DateTime<Utc>,
}

impl From<ConnectionStatus> for ConnectionInfo {
    fn from(status: ConnectionStatus) -> Self {
        Self {
            authenticated: status.is_authenticated(),
            state: status.state,
            reconnect_attempts: status.reconnect_attempts,
            since: status.since,
        }
    }
}

/// Entry counts of the diagnostics log.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSummary {
    /// Entries currently held.
    pub entries: usize,
    /// Entries at error severity.
    pub errors: usize,
}

/// Serializes the contents of a shared snapshot.
struct Shared<T>(Arc<T>);

impl<T: Serialize> Serialize for Shared<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

// =============================================================================
// Status Server State
// =============================================================================

/// Shared state for the status server.
pub struct StatusServerState {
    version: String,
    started_at: Instant,
    feed: Arc<dyn QuoteFeed>,
}

impl StatusServerState {
    /// Create new status server state.
    #[must_use]
    pub fn new(version: String, feed: Arc<dyn QuoteFeed>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
        }
    }
}

// =============================================================================
// Status Server
// =============================================================================

/// Build the status routes.
pub fn router(state: Arc<StatusServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/quotes", get(quotes_handler))
        .route("/quotes/{code}", get(quote_handler))
        .route("/diagnostics", get(diagnostics_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Status HTTP server.
pub struct StatusServer {
    port: u16,
    state: Arc<StatusServerState>,
    cancel: CancellationToken,
}

impl StatusServer {
    /// Create a new status server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StatusServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the status server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StatusServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StatusServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StatusServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StatusServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = if response.connection.authenticated {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    if state.feed.connection_status().is_authenticated() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn quotes_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    Json(Shared(state.feed.market_data()))
}

async fn quote_handler(
    State(state): State<Arc<StatusServerState>>,
    Path(code): Path<String>,
) -> Response {
    match state.feed.quote(&code) {
        Some(quote) => Json(quote).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "unknown instrument", "code": code })),
        )
            .into_response(),
    }
}

async fn diagnostics_handler(State(state): State<Arc<StatusServerState>>) -> impl IntoResponse {
    Json(Shared(state.feed.diagnostics()))
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &StatusServerState) -> HealthResponse {
    let status = state.feed.connection_status();
    let diagnostics = state.feed.diagnostics();

    HealthResponse {
        status: HealthStatus::from_state(status.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        connection: status.into(),
        instruments: state.feed.market_data().len(),
        diagnostics: DiagnosticsSummary {
            entries: diagnostics.len(),
            errors: diagnostics
                .iter()
                .filter(|e| e.severity == Severity::Error)
                .count(),
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Status server errors.
#[derive(Debug, thiserror::Error)]
pub enum StatusServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
