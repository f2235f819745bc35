//! Client Configuration Settings
//!
//! Configuration types for the gateway client, loaded from environment
//! variables. Every lookup goes through a key → value source so the parsing
//! rules can be exercised without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::domain::diagnostics::DEFAULT_LOG_CAPACITY;

/// Default gateway endpoint (UAT environment).
pub const DEFAULT_GATEWAY_URL: &str = "wss://mitakerainbowuat.mtkstock.com.tw:8633/";

/// Default `apiver` field.
pub const DEFAULT_API_VERSION: &str = "1.0";

// =============================================================================
// Market Permissions
// =============================================================================

/// Per-market data permission declared during the auth handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PermissionFlag {
    /// Real-time quotes.
    #[serde(rename = "r")]
    RealTime,
    /// Delayed quotes.
    #[serde(rename = "d")]
    Delayed,
    /// No access.
    #[default]
    #[serde(rename = "n")]
    None,
}

impl PermissionFlag {
    /// Parse a wire flag (`r`, `d`, `n`), case-insensitive.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "r" => Some(Self::RealTime),
            "d" => Some(Self::Delayed),
            "n" => Some(Self::None),
            _ => None,
        }
    }

    /// Get the wire flag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RealTime => "r",
            Self::Delayed => "d",
            Self::None => "n",
        }
    }
}

/// Permission flags for every market the gateway knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketPermissions {
    /// US equities.
    pub us: PermissionFlag,
    /// Hong Kong equities.
    pub hk: PermissionFlag,
    /// Taiwan equities.
    pub tw: PermissionFlag,
}

impl Default for MarketPermissions {
    fn default() -> Self {
        Self {
            us: PermissionFlag::RealTime,
            hk: PermissionFlag::None,
            tw: PermissionFlag::None,
        }
    }
}

// =============================================================================
// Device Identity
// =============================================================================

/// Device fingerprint the vendor requires on the auth request.
///
/// The fields are serialized at the top level of the auth envelope.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    /// Product id.
    pub pid: String,
    /// Application bundle id.
    pub app: String,
    /// Application version.
    pub ver: String,
    /// Platform name.
    pub platform: String,
    /// Device class.
    pub device: String,
    /// Hardware id.
    pub hid: String,
    /// Account type.
    #[serde(rename = "type")]
    pub account_type: String,
    /// User id.
    pub uid: String,
    /// Operating system label.
    pub platform_os: String,
    /// Device mode label.
    pub device_mode: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            pid: "SNPW".to_string(),
            app: "com.snp.web".to_string(),
            ver: "1.0.0".to_string(),
            platform: "WEB".to_string(),
            device: "BROWSER".to_string(),
            hid: "user-agent-browser".to_string(),
            account_type: "SEC".to_string(),
            uid: "GUEST_USER".to_string(),
            platform_os: "WebOS".to_string(),
            device_mode: "Browser".to_string(),
        }
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("pid", &self.pid)
            .field("app", &self.app)
            .field("ver", &self.ver)
            .field("platform", &self.platform)
            .field("device", &self.device)
            .field("account_type", &self.account_type)
            .field("uid", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Settings Groups
// =============================================================================

/// Gateway endpoint settings.
#[derive(Clone)]
pub struct GatewaySettings {
    /// WebSocket endpoint.
    pub url: String,
    /// `apiver` field carried by every request.
    pub api_version: String,
    /// `auth_key` carried in the auth data envelope.
    pub auth_key: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            auth_key: String::new(),
        }
    }
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("url", &self.url)
            .field("api_version", &self.api_version)
            .field("auth_key", &"[REDACTED]")
            .finish()
    }
}

/// WebSocket timer settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat request interval.
    pub heartbeat_interval: Duration,
    /// Delay before replaying a request the gateway timed out.
    pub retry_delay: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier (1.0 = fixed delay).
    pub reconnect_delay_multiplier: f64,
    /// Reconnection delay jitter as a fraction of the delay (0.0 = none).
    pub reconnect_jitter: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Transport open timeout.
    pub connect_timeout: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            reconnect_delay_initial: Duration::from_secs(3),
            reconnect_delay_max: Duration::from_secs(3),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 0, // Unlimited
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Status HTTP port (0 = disabled).
    pub status_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { status_port: 8083 }
    }
}

/// Instruments the binary watches at start.
#[derive(Debug, Clone, Default)]
pub struct WatchSettings {
    /// Codes listed directly.
    pub codes: Vec<String>,
    /// AI pick-list file whose symbols are added to `codes`.
    pub picks_file: Option<PathBuf>,
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway endpoint settings.
    pub gateway: GatewaySettings,
    /// Timer settings.
    pub websocket: WebSocketSettings,
    /// Market permission flags.
    pub permissions: MarketPermissions,
    /// Device fingerprint.
    pub identity: DeviceIdentity,
    /// Diagnostics ring capacity.
    pub log_capacity: usize,
    /// Server port settings.
    pub server: ServerSettings,
    /// Start-up watch list.
    pub watch: WatchSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            websocket: WebSocketSettings::default(),
            permissions: MarketPermissions::default(),
            identity: DeviceIdentity::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            server: ServerSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway URL is empty or a permission flag is
    /// not one of `r`, `d`, `n`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key → value source.
    ///
    /// # Errors
    ///
    /// Same as [`ClientConfig::from_env`].
    pub fn from_source<F>(source: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(source);

        let url = env
            .string("SINOPAC_WS_URL")
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string());
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("SINOPAC_WS_URL".to_string()));
        }

        let gateway = GatewaySettings {
            url: url.trim().to_string(),
            api_version: env
                .string("SINOPAC_API_VERSION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            auth_key: env.string("SINOPAC_AUTH_KEY").unwrap_or_default(),
        };

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "SINOPAC_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            retry_delay: env.duration_millis("SINOPAC_RETRY_DELAY_MS", defaults.retry_delay),
            reconnect_delay_initial: env.duration_millis(
                "SINOPAC_RECONNECT_DELAY_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "SINOPAC_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parsed(
                "SINOPAC_RECONNECT_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parsed("SINOPAC_RECONNECT_JITTER", defaults.reconnect_jitter),
            max_reconnect_attempts: env.parsed(
                "SINOPAC_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            connect_timeout: env
                .duration_secs("SINOPAC_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
        };

        let default_permissions = MarketPermissions::default();
        let permissions = MarketPermissions {
            us: env.permission("SINOPAC_PERMISSION_US", default_permissions.us)?,
            hk: env.permission("SINOPAC_PERMISSION_HK", default_permissions.hk)?,
            tw: env.permission("SINOPAC_PERMISSION_TW", default_permissions.tw)?,
        };

        let default_identity = DeviceIdentity::default();
        let identity = DeviceIdentity {
            pid: env.string_or("SINOPAC_PID", default_identity.pid),
            app: env.string_or("SINOPAC_APP", default_identity.app),
            ver: env.string_or("SINOPAC_APP_VERSION", default_identity.ver),
            platform: env.string_or("SINOPAC_PLATFORM", default_identity.platform),
            device: env.string_or("SINOPAC_DEVICE", default_identity.device),
            hid: env.string_or("SINOPAC_HID", default_identity.hid),
            account_type: env.string_or("SINOPAC_TYPE", default_identity.account_type),
            uid: env.string_or("SINOPAC_UID", default_identity.uid),
            platform_os: env.string_or("SINOPAC_PLATFORM_OS", default_identity.platform_os),
            device_mode: env.string_or("SINOPAC_DEVICE_MODE", default_identity.device_mode),
        };

        let server = ServerSettings {
            status_port: env.parsed("STATUS_PORT", ServerSettings::default().status_port),
        };

        let watch = WatchSettings {
            codes: env
                .string("SINOPAC_WATCH_CODES")
                .map(|raw| split_codes(&raw))
                .unwrap_or_default(),
            picks_file: env
                .string("SINOPAC_PICKS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };

        Ok(Self {
            gateway,
            websocket,
            permissions,
            identity,
            log_capacity: env.parsed("SINOPAC_LOG_CAPACITY", DEFAULT_LOG_CAPACITY),
            server,
            watch,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable has a value outside its alphabet.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Split a comma-separated code list, dropping blanks.
fn split_codes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(ToString::to_string)
        .collect()
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string_or(&self, key: &str, default: String) -> String {
        self.string(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(default)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn permission(&self, key: &str, default: PermissionFlag) -> Result<PermissionFlag, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(raw) => PermissionFlag::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        }
    }
}
