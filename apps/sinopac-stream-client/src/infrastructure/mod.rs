//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the gateway client, which implements the port
//! interfaces defined in the application layer, and the ambient services
//! around it.

/// SinoPac quote gateway WebSocket client.
pub mod gateway;

/// Configuration loading.
pub mod config;

/// Status HTTP endpoint.
pub mod status;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
