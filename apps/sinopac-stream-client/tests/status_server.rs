//! Status Server Integration Tests
//!
//! Exercises the HTTP routes against a fixed in-memory feed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

use sinopac_stream_client::{
    ConnectionState, ConnectionStatus, DiagnosticsLog, FeedError, LogEntry, MarketDataStore,
    MarketSnapshot, QuoteFeed, QuoteFragment, Severity, StatusServerState, status_router,
};

struct FixedFeed {
    status: ConnectionStatus,
    market: MarketSnapshot,
    diagnostics: Arc<Vec<LogEntry>>,
}

impl FixedFeed {
    fn new(state: ConnectionState) -> Self {
        let mut store = MarketDataStore::new();
        store.merge_snapshot(
            QuoteFragment::new("AAPL.US")
                .with_price(Decimal::new(18950, 2))
                .with_volume(Decimal::new(1200, 0)),
            Utc::now(),
        );
        store.merge_history("AAPL.US", vec![Decimal::new(188, 0)], Utc::now());

        let mut log = DiagnosticsLog::new(10);
        log.push(Severity::Info, "authenticated");
        log.push(Severity::Error, "dropped gzip frame");

        Self {
            status: ConnectionStatus::new(state, 0),
            market: store.snapshot(),
            diagnostics: Arc::new(log.snapshot()),
        }
    }
}

impl QuoteFeed for FixedFeed {
    fn connection_status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    fn market_data(&self) -> MarketSnapshot {
        Arc::clone(&self.market)
    }

    fn diagnostics(&self) -> Arc<Vec<LogEntry>> {
        Arc::clone(&self.diagnostics)
    }

    fn subscribe(&self, _codes: Vec<String>) -> Result<(), FeedError> {
        Ok(())
    }

    fn subscribe_replacing(&self, _codes: Vec<String>) -> Result<(), FeedError> {
        Ok(())
    }

    fn init_watch(&self, _codes: Vec<String>) -> Result<(), FeedError> {
        Ok(())
    }
}

fn app(state: ConnectionState) -> axum::Router {
    let feed: Arc<dyn QuoteFeed> = Arc::new(FixedFeed::new(state));
    status_router(Arc::new(StatusServerState::new("test-0.0.1".to_string(), feed)))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(app, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_when_authenticated() {
    let (status, body) = get_json(app(ConnectionState::Authenticated), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "test-0.0.1");
    assert_eq!(body["connection"]["state"], "authenticated");
    assert_eq!(body["connection"]["authenticated"], true);
    assert_eq!(body["instruments"], 1);
    assert_eq!(body["diagnostics"]["entries"], 2);
    assert_eq!(body["diagnostics"]["errors"], 1);
}

#[tokio::test]
async fn test_health_unavailable_until_authenticated() {
    let (status, body) = get_json(app(ConnectionState::AuthPending), "/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");

    let (status, body) = get(app(ConnectionState::Disconnected), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"NOT READY");
}

#[tokio::test]
async fn test_probes() {
    let (status, body) = get(app(ConnectionState::Disconnected), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");

    let (status, body) = get(app(ConnectionState::Authenticated), "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"READY");
}

#[tokio::test]
async fn test_quotes_snapshot() {
    let (status, body) = get_json(app(ConnectionState::Authenticated), "/quotes").await;

    assert_eq!(status, StatusCode::OK);
    let quotes: BTreeMap<String, Value> = serde_json::from_value(body).unwrap();
    assert_eq!(quotes.len(), 1);
    assert_eq!(quotes["AAPL.US"]["code"], "AAPL.US");
    assert_eq!(quotes["AAPL.US"]["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_single_quote_and_unknown_code() {
    let (status, body) = get_json(app(ConnectionState::Authenticated), "/quotes/AAPL.US").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], "AAPL.US");

    let (status, body) = get_json(app(ConnectionState::Authenticated), "/quotes/TSLA.US").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TSLA.US");
}

#[tokio::test]
async fn test_diagnostics_oldest_first() {
    let (status, body) = get_json(app(ConnectionState::Authenticated), "/diagnostics").await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["message"], "authenticated");
    assert_eq!(entries[1]["severity"], "error");
}

#[tokio::test]
async fn test_metrics_without_recorder() {
    let (status, _) = get(app(ConnectionState::Authenticated), "/metrics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
