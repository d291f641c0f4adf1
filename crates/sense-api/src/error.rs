use thiserror::Error;

/// Top-level error type for the `sense-api` crate.
///
/// Covers every failure mode of the REST surface and the realtime feed:
/// authentication, token renewal, transport, and feed misuse.
/// `sense-core` maps these into session-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected. Carries the server-supplied reason verbatim.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The account requires a second factor the client cannot satisfy.
    #[error("Unsupported MFA type: only totp is supported, received '{method}'")]
    UnsupportedMfa { method: String },

    /// A TOTP code is required but no provider was able to supply one.
    #[error("Two-factor authentication code required")]
    TwoFactorRequired,

    /// No token has been obtained yet (login never succeeded).
    #[error("Not authenticated -- login required")]
    NotAuthenticated,

    /// The access token expired and renewing it failed.
    #[error("Token expired -- renewal failed")]
    TokenExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status from a REST endpoint.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Realtime feed ───────────────────────────────────────────────
    /// The account has no monitor, so there is no feed endpoint to open.
    #[error("No monitor associated with this account")]
    NoMonitor,

    /// Opening the WebSocket failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The peer closed the WebSocket.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Reading a frame from an open WebSocket failed.
    #[error("WebSocket read failed: {0}")]
    WebSocketRead(String),

    /// `close()` called with no open connection.
    #[error("WebSocket already closed")]
    FeedAlreadyClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` for failures that only new credentials can resolve.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. }
                | Self::UnsupportedMfa { .. }
                | Self::TwoFactorRequired
                | Self::NotAuthenticated
                | Self::TokenExpired
        )
    }

    /// Returns `true` if the failure came from the network rather than
    /// from the service rejecting the request.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::WebSocketRead(_) => {
                true
            }
            _ => false,
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_classified() {
        assert!(Error::TokenExpired.is_auth_failure());
        assert!(
            Error::UnsupportedMfa {
                method: "sms".into()
            }
            .is_auth_failure()
        );
        assert!(!Error::FeedAlreadyClosed.is_auth_failure());
    }

    #[test]
    fn websocket_errors_are_transport() {
        let err = Error::WebSocketClosed {
            code: 1000,
            reason: "bye".into(),
        };
        assert!(err.is_transport());
        assert!(!Error::NoMonitor.is_transport());
    }

    #[test]
    fn unsupported_mfa_message_names_the_method() {
        let err = Error::UnsupportedMfa {
            method: "sms".into(),
        };
        assert!(err.to_string().contains("'sms'"));
    }
}
