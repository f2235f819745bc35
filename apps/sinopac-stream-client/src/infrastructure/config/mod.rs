//! Configuration Module
//!
//! Configuration loading for the gateway client and status server.

mod settings;

pub use settings::{
    ClientConfig, ConfigError, DEFAULT_API_VERSION, DEFAULT_GATEWAY_URL, DeviceIdentity,
    GatewaySettings, MarketPermissions, PermissionFlag, ServerSettings, WatchSettings,
    WebSocketSettings,
};
