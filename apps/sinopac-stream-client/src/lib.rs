#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! SinoPac Stream Client - Real-time Quote Gateway Client
//!
//! Maintains one authenticated WebSocket session with the SinoPac quote
//! gateway, keeps an in-memory table of the latest quote and intraday trend
//! per instrument, and exposes that table to readers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `market_data`: Instrument codes, markets, the market data store
//!   - `diagnostics`: Bounded diagnostics log
//!   - `connection`: Connection lifecycle states
//!   - `watchlist`: Push registrations per market
//!   - `picks`: AI pick-list contract
//!
//! - **Application**: Port definitions
//!   - `ports`: The `QuoteFeed` read/subscribe interface
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `gateway`: Protocol codec, session state machine, WebSocket driver
//!   - `config`: Configuration from the environment
//!   - `status`: Status HTTP endpoint
//!   - `metrics` / `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐   watch    ┌───────────────┐
//! Quote gateway ◄───►│ GatewayClient│──────────► │ GatewayHandle │──► status server / UI
//!   (WebSocket)      │  + Session   │◄────────── │  (QuoteFeed)  │
//!                    └──────────────┘  commands  └───────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market data types with no external dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionState, ConnectionStatus};
pub use domain::diagnostics::{DiagnosticsLog, LogEntry, Severity};
pub use domain::market_data::{
    InstrumentQuote, Market, MarketDataStore, MarketPartition, MarketSnapshot, QuoteFragment,
};
pub use domain::picks::{MarketAnalysis, PicksError, StockPick, parse_analysis};

// Ports
pub use application::ports::{FeedError, QuoteFeed};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, DeviceIdentity, GatewaySettings, MarketPermissions, PermissionFlag,
    ServerSettings, WatchSettings, WebSocketSettings,
};

// Gateway client
pub use infrastructure::gateway::{
    GatewayClient, GatewayClientConfig, GatewayClientError, GatewayHandle,
};

// Status server
pub use infrastructure::status::{
    StatusServer, StatusServerError, StatusServerState, router as status_router,
};

// Metrics
pub use infrastructure::metrics::{MetricsError, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{
    TelemetryConfig, TelemetryError, TelemetryGuard, init as init_telemetry,
};
