//! Gateway Authentication
//!
//! The handshake is a single `auth` request sent right after the transport
//! opens. It carries the device fingerprint at the top level and the market
//! permission flags in `data`, and has no `token` field.
//!
//! # Authentication Flow
//!
//! 1. Transport opens
//! 2. Send `{"api":"auth","sn":1,"pid":"SNPW",...,"data":{"US":"r","HK":"n",...}}`
//! 3. Receive `{"api":"auth","sn":1,"data":{"rc":"000","token":"..."}}`
//!
//! Any other outcome leaves the connection unauthenticated. Authentication
//! is not retried here; the reconnect loop retries by opening a new
//! transport.

use thiserror::Error;

use super::messages::{AuthParams, GatewayRequest, StatusCode};
use crate::infrastructure::config::{DeviceIdentity, MarketPermissions};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The gateway answered with a non-success status code.
    #[error("authentication rejected (rc={0})")]
    Rejected(String),

    /// The gateway timed out the handshake.
    #[error("authentication timed out at the gateway")]
    TimedOut,

    /// Success status without a token.
    #[error("authentication response carried no token")]
    MissingToken,

    /// Response without a status code.
    #[error("authentication response carried no status code")]
    MissingStatus,
}

// =============================================================================
// Authentication Handler
// =============================================================================

/// Builds the auth request and holds the session token.
///
/// Connection state lives in the session; this type only knows whether a
/// token was granted on the current transport.
///
/// # Example
///
/// ```rust
/// use sinopac_stream_client::infrastructure::config::{DeviceIdentity, MarketPermissions};
/// use sinopac_stream_client::infrastructure::gateway::auth::AuthHandler;
/// use sinopac_stream_client::infrastructure::gateway::messages::StatusCode;
///
/// let mut handler = AuthHandler::new(DeviceIdentity::default(), MarketPermissions::default(), "");
/// let _request = handler.create_auth_request();
///
/// let token = handler
///     .on_response(Some(&StatusCode::Success), Some("T1".to_string()))
///     .unwrap();
/// assert_eq!(token, "T1");
/// assert_eq!(handler.token(), Some("T1"));
/// ```
pub struct AuthHandler {
    identity: DeviceIdentity,
    permissions: MarketPermissions,
    auth_key: String,
    token: Option<String>,
}

impl AuthHandler {
    /// Create a new handler.
    #[must_use]
    pub fn new(
        identity: DeviceIdentity,
        permissions: MarketPermissions,
        auth_key: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            permissions,
            auth_key: auth_key.into(),
            token: None,
        }
    }

    /// Session token, present only after a successful handshake.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Device fingerprint stamped on the auth envelope.
    #[must_use]
    pub const fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Build the auth request, forgetting any previous token.
    #[must_use]
    pub fn create_auth_request(&mut self) -> GatewayRequest {
        self.token = None;

        GatewayRequest::Auth(AuthParams {
            auth_key: self.auth_key.clone(),
            us: self.permissions.us,
            hk: self.permissions.hk,
            tw: self.permissions.tw,
        })
    }

    /// Process the auth response.
    ///
    /// # Errors
    ///
    /// Returns an `AuthError` (and clears the token) unless the status is
    /// success and a non-empty token is present.
    pub fn on_response(
        &mut self,
        status: Option<&StatusCode>,
        token: Option<String>,
    ) -> Result<&str, AuthError> {
        let outcome = match (status, token) {
            (Some(StatusCode::Success), Some(token)) if !token.trim().is_empty() => Ok(token),
            (Some(StatusCode::Success), _) => Err(AuthError::MissingToken),
            (Some(StatusCode::Timeout), _) => Err(AuthError::TimedOut),
            (Some(StatusCode::Failure(code)), _) => Err(AuthError::Rejected(code.clone())),
            (None, _) => Err(AuthError::MissingStatus),
        };

        match outcome {
            Ok(token) => Ok(self.token.insert(token).as_str()),
            Err(err) => {
                self.token = None;
                Err(err)
            }
        }
    }

    /// Forget the token (transport closed).
    pub fn reset(&mut self) {
        self.token = None;
    }
}

impl std::fmt::Debug for AuthHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthHandler")
            .field("identity", &self.identity)
            .field("permissions", &self.permissions)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::PermissionFlag;

    fn handler() -> AuthHandler {
        AuthHandler::new(DeviceIdentity::default(), MarketPermissions::default(), "")
    }

    #[test]
    fn request_carries_permissions() {
        let mut handler = AuthHandler::new(
            DeviceIdentity::default(),
            MarketPermissions {
                us: PermissionFlag::Delayed,
                hk: PermissionFlag::RealTime,
                tw: PermissionFlag::None,
            },
            "k",
        );

        let GatewayRequest::Auth(params) = handler.create_auth_request() else {
            panic!("expected auth request");
        };
        assert_eq!(params.us, PermissionFlag::Delayed);
        assert_eq!(params.hk, PermissionFlag::RealTime);
        assert_eq!(params.auth_key, "k");
        assert_eq!(handler.token(), None);
    }

    #[test]
    fn success_stores_token() {
        let mut handler = handler();
        let _ = handler.create_auth_request();

        let token = handler
            .on_response(Some(&StatusCode::Success), Some("T1".to_string()))
            .unwrap()
            .to_string();
        assert_eq!(token, "T1");
        assert_eq!(handler.token(), Some("T1"));
    }

    #[test]
    fn success_without_token_fails() {
        let mut handler = handler();
        let result = handler.on_response(Some(&StatusCode::Success), Some("  ".to_string()));
        assert_eq!(result, Err(AuthError::MissingToken));
        assert_eq!(handler.token(), None);
    }

    #[test]
    fn rejection_keeps_connection_unauthenticated() {
        let mut handler = handler();
        let result = handler.on_response(
            Some(&StatusCode::Failure("401".to_string())),
            Some("T1".to_string()),
        );
        assert_eq!(result, Err(AuthError::Rejected("401".to_string())));
        assert_eq!(handler.token(), None);
    }

    #[test]
    fn reset_clears_token() {
        let mut handler = handler();
        let _ = handler.on_response(Some(&StatusCode::Success), Some("T1".to_string()));
        handler.reset();
        assert_eq!(handler.token(), None);
    }

    #[test]
    fn debug_redacts_token() {
        let mut handler = handler();
        let _ = handler.on_response(Some(&StatusCode::Success), Some("secret-token".to_string()));
        let debug = format!("{handler:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
