//! Domain Layer - Core market data types and business rules.
//!
//! This layer contains the core domain types with no I/O. All types here
//! are pure Rust with serialization support.

/// Connection lifecycle states.
pub mod connection;

/// Diagnostics ring buffer.
pub mod diagnostics;

/// Instrument codes, markets, and the market data store.
pub mod market_data;

/// AI pick-list contract consumed by the subscription façade.
pub mod picks;

/// Push subscription tracking per market.
pub mod watchlist;
