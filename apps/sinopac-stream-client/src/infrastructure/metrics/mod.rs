//! Prometheus Metrics Module
//!
//! Exposes client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by api kind and encoding, decode failures
//! - **Requests**: outbound requests by kind, outcomes, replays, latency
//! - **Connection**: lifecycle state gauge and reconnect attempts
//! - **Store**: tracked instrument count
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the status server port. Without an
//! installed recorder every `record_*` call is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Errors from installing the recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Another recorder is installed or the builder failed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Frames
    describe_counter!(
        "sinopac_client_frames_received_total",
        "Inbound gateway frames by api kind and encoding"
    );
    describe_counter!(
        "sinopac_client_decode_failures_total",
        "Inbound frames dropped because they could not be inflated or parsed"
    );

    // Requests
    describe_counter!(
        "sinopac_client_requests_sent_total",
        "Outbound gateway requests by api kind"
    );
    describe_counter!(
        "sinopac_client_request_outcomes_total",
        "Resolved requests by api kind and outcome"
    );
    describe_counter!(
        "sinopac_client_replays_total",
        "Requests replayed after a gateway timeout"
    );
    describe_histogram!(
        "sinopac_client_response_latency_seconds",
        "Time from sending a request to resolving its response"
    );
    describe_gauge!(
        "sinopac_client_pending_requests",
        "Requests awaiting a response"
    );

    // Connection
    describe_gauge!(
        "sinopac_client_connection_state",
        "0 disconnected, 1 connecting, 2 auth pending, 3 authenticated, 4 closing"
    );
    describe_counter!(
        "sinopac_client_reconnects_total",
        "Gateway reconnection attempts"
    );

    // Store
    describe_gauge!(
        "sinopac_client_instruments",
        "Instruments tracked in the market data store"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label of a resolved request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// `rc = 000`.
    Success,
    /// `rc = 408`.
    Timeout,
    /// Any other code.
    Failure,
}

impl RequestOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Failure => "failure",
        }
    }
}

/// Record an inbound frame.
pub fn record_frame_received(api: &'static str, encoding: &'static str) {
    counter!(
        "sinopac_client_frames_received_total",
        "api" => api,
        "encoding" => encoding
    )
    .increment(1);
}

/// Record a dropped frame.
pub fn record_decode_failure(encoding: &'static str) {
    counter!(
        "sinopac_client_decode_failures_total",
        "encoding" => encoding
    )
    .increment(1);
}

/// Record an outbound request.
pub fn record_request_sent(api: &'static str) {
    counter!("sinopac_client_requests_sent_total", "api" => api).increment(1);
}

/// Record a resolved request and its round-trip latency.
pub fn record_request_outcome(api: &'static str, outcome: RequestOutcome, latency: Duration) {
    counter!(
        "sinopac_client_request_outcomes_total",
        "api" => api,
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("sinopac_client_response_latency_seconds", "api" => api)
        .record(latency.as_secs_f64());
}

/// Record a replay after a timeout.
pub fn record_replay(api: &'static str) {
    counter!("sinopac_client_replays_total", "api" => api).increment(1);
}

/// Update the pending request gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_requests(count: usize) {
    gauge!("sinopac_client_pending_requests").set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("sinopac_client_connection_state").set(state.gauge_value());
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("sinopac_client_reconnects_total").increment(1);
}

/// Update the tracked instrument gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_instruments(count: usize) {
    gauge!("sinopac_client_instruments").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
