//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how readers interact
//! with the quote client.

/// Port interfaces for quote feed readers.
pub mod ports;
