// ── Core error types ──
//
// Session-level errors from sense-core. Consumers see what went wrong with
// the session (login, token, feed, buffer) rather than raw transport
// details. The `From<sense_api::Error>` impl does the translation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Unsupported MFA type: only totp is supported, received '{method}'")]
    UnsupportedMfa { method: String },

    #[error("Token expired and could not be renewed -- log in again")]
    TokenExpired,

    // ── Connection ───────────────────────────────────────────────────
    #[error("Cannot reach Sense at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("No monitor associated with this account")]
    NoMonitor,

    #[error("Realtime feed disconnected: {reason}")]
    FeedDisconnected { reason: String },

    // ── Misuse ───────────────────────────────────────────────────────
    #[error("Realtime feed is already closed")]
    FeedAlreadyClosed,

    #[error("Async reading has not been started -- call start_async_read() first")]
    AsyncReadNotStarted,

    // ── Data ─────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    #[error("Invalid message from Sense: {message}")]
    InvalidMessage { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failure can only be fixed by logging in again.
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::UnsupportedMfa { .. } | Self::TokenExpired
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<sense_api::Error> for CoreError {
    fn from(err: sense_api::Error) -> Self {
        use sense_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::UnsupportedMfa { method } => CoreError::UnsupportedMfa { method },
            Api::TwoFactorRequired => CoreError::AuthenticationFailed {
                message: "Two-factor authentication code required".into(),
            },
            Api::NotAuthenticated => CoreError::AuthenticationFailed {
                message: "Not logged in".into(),
            },
            Api::TokenExpired => CoreError::TokenExpired,
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), |u| u.origin().ascii_serialization()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            Api::NoMonitor => CoreError::NoMonitor,
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::FeedDisconnected {
                reason: format!("closed by server (code {code}) {reason}").trim_end().to_owned(),
            },
            Api::WebSocketRead(reason) => CoreError::FeedDisconnected { reason },
            Api::FeedAlreadyClosed => CoreError::FeedAlreadyClosed,
            Api::Deserialization { message, body: _ } => CoreError::InvalidMessage { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_expiry_requires_login() {
        let err = CoreError::from(sense_api::Error::TokenExpired);
        assert!(matches!(err, CoreError::TokenExpired));
        assert!(err.requires_login());
    }

    #[test]
    fn feed_close_maps_to_disconnected() {
        let err = CoreError::from(sense_api::Error::WebSocketClosed {
            code: 1000,
            reason: String::new(),
        });
        assert_eq!(err.to_string(), "Realtime feed disconnected: closed by server (code 1000)");
    }

    #[test]
    fn misuse_stays_distinct() {
        let err = CoreError::from(sense_api::Error::FeedAlreadyClosed);
        assert!(matches!(err, CoreError::FeedAlreadyClosed));
        assert!(!err.requires_login());
    }
}
