//! Port Interfaces
//!
//! Defines the interfaces (ports) between the quote client and the code that
//! reads from it, following the Hexagonal Architecture pattern.
//!
//! ## Driver Ports (Inbound)
//!
//! - `QuoteFeed`: the read surface a UI or HTTP adapter consumes, plus the
//!   subscription commands it may issue

use std::sync::Arc;

use crate::domain::connection::ConnectionStatus;
use crate::domain::diagnostics::LogEntry;
use crate::domain::market_data::{InstrumentQuote, MarketSnapshot};

/// Errors returned by a [`QuoteFeed`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// The client event loop has stopped.
    #[error("quote feed is closed")]
    Closed,
}

/// Read and subscribe access to a live quote feed.
///
/// Reads return snapshots; they never block on the connection. Commands are
/// queued and take effect on the feed's own task; a command issued while the
/// connection is not authenticated is a logged no-op there, not an error
/// here.
pub trait QuoteFeed: Send + Sync {
    /// Current connection status.
    fn connection_status(&self) -> ConnectionStatus;

    /// Snapshot of every tracked instrument.
    fn market_data(&self) -> MarketSnapshot;

    /// One instrument from the current snapshot.
    fn quote(&self, code: &str) -> Option<InstrumentQuote> {
        self.market_data().get(code).cloned()
    }

    /// Diagnostics log, oldest first.
    fn diagnostics(&self) -> Arc<Vec<LogEntry>>;

    /// Register codes for push updates, keeping existing registrations.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the feed has stopped.
    fn subscribe(&self, codes: Vec<String>) -> Result<(), FeedError>;

    /// Register codes for push updates, replacing the registrations of the
    /// markets they belong to.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the feed has stopped.
    fn subscribe_replacing(&self, codes: Vec<String>) -> Result<(), FeedError>;

    /// Request a quote and a trend for each code, then subscribe to pushes.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Closed`] if the feed has stopped.
    fn init_watch(&self, codes: Vec<String>) -> Result<(), FeedError>;
}
