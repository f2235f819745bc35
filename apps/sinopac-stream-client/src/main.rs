//! SinoPac Stream Client Binary
//!
//! Connects to the quote gateway and serves the market data table over the
//! status endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sinopac-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `SINOPAC_WS_URL`: Gateway endpoint
//! - `SINOPAC_WATCH_CODES`: Comma-separated codes to watch, e.g. `AAPL.US,0700.HK`
//! - `SINOPAC_PICKS_FILE`: AI pick-list JSON whose symbols are watched too
//! - `SINOPAC_PERMISSION_US` / `_HK` / `_TW`: `r` | `d` | `n`
//! - `STATUS_PORT`: Status HTTP port, 0 to disable (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use sinopac_stream_client::infrastructure::status::{StatusServer, StatusServerState};
use sinopac_stream_client::infrastructure::telemetry;
use sinopac_stream_client::{
    ClientConfig, GatewayClient, GatewayClientConfig, QuoteFeed, WatchSettings, init_metrics,
    parse_analysis,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Already installed is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting SinoPac stream client");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let watch_codes = load_watch_codes(&config.watch).await;
    let shutdown_token = CancellationToken::new();

    let (gateway, mut gateway_task) = GatewayClient::spawn(
        GatewayClientConfig::from_config(&config),
        shutdown_token.clone(),
    );

    // Spawn status server
    if config.server.status_port == 0 {
        tracing::info!("Status server disabled");
    } else {
        let feed: Arc<dyn QuoteFeed> = Arc::new(gateway.clone());
        let status_state = Arc::new(StatusServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            feed,
        ));
        let status_server = StatusServer::new(
            config.server.status_port,
            status_state,
            shutdown_token.clone(),
        );

        tokio::spawn(async move {
            if let Err(e) = status_server.run().await {
                tracing::error!(error = %e, "Status server error");
            }
        });
    }

    // Initial watch once a session authenticates. Later sessions restore
    // their push registrations themselves.
    let watcher = gateway.clone();
    let watch_cancel = shutdown_token.clone();
    tokio::spawn(async move {
        if watch_codes.is_empty() {
            tracing::info!("No watch codes configured");
            return;
        }

        let count = watch_codes.len();
        tokio::select! {
            () = watch_cancel.cancelled() => {}
            result = watcher.init_watch_when_authenticated(watch_codes) => match result {
                Ok(()) => tracing::info!(count, "Initial watch requested"),
                Err(e) => tracing::warn!(error = %e, "Initial watch not sent"),
            },
        }
    });

    tracing::info!("Stream client ready");

    tokio::select! {
        () = wait_for_signal() => {
            shutdown_token.cancel();
            tracing::info!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Graceful shutdown started"
            );

            match tokio::time::timeout(SHUTDOWN_TIMEOUT, gateway_task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(error = %e, "Gateway client error"),
                Ok(Err(e)) => tracing::error!(error = %e, "Gateway client task failed"),
                Err(_) => tracing::warn!("Gateway client did not stop in time"),
            }
        }
        joined = &mut gateway_task => {
            shutdown_token.cancel();
            joined??;
        }
    }

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Codes from `SINOPAC_WATCH_CODES` followed by the pick-list symbols.
async fn load_watch_codes(watch: &WatchSettings) -> Vec<String> {
    let mut codes = watch.codes.clone();

    let Some(path) = &watch.picks_file else {
        return codes;
    };

    match tokio::fs::read_to_string(path).await {
        Ok(text) => match parse_analysis(&text) {
            Ok(analysis) => {
                tracing::info!(
                    path = %path.display(),
                    hot_sector = %analysis.hot_sector,
                    picks = analysis.stocks.len(),
                    "Loaded pick list"
                );
                for symbol in analysis.symbols() {
                    if !codes.contains(&symbol) {
                        codes.push(symbol);
                    }
                }
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Invalid pick list"),
        },
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Cannot read pick list"),
    }

    codes
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        url = %config.gateway.url,
        api_version = %config.gateway.api_version,
        us = config.permissions.us.as_str(),
        hk = config.permissions.hk.as_str(),
        tw = config.permissions.tw.as_str(),
        status_port = config.server.status_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_secs = config.websocket.heartbeat_interval.as_secs(),
        retry_delay_ms = config.websocket.retry_delay.as_millis(),
        reconnect_delay_ms = config.websocket.reconnect_delay_initial.as_millis(),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "Gateway timers"
    );
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
