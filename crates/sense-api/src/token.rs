// Token store and second-factor providers.
//
// Sense access tokens are a `t1.v2.` vendor prefix wrapped around a JWT.
// The client never verifies the signature (it holds no key); it only reads
// the `exp` claim to decide when to renew.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;

/// The credential pair issued by `/authenticate`, `/authenticate/mfa`,
/// and `/renew`, plus the identifiers the client needs afterwards.
///
/// Expiry is not stored; it is decoded from the access token on every
/// check.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    pub user_id: i64,
    pub account_id: i64,
    /// First monitor on the account; keys the realtime feed path.
    pub monitor_id: Option<i64>,
}

impl Token {
    /// Whether the access token is unusable at the current instant.
    pub fn is_expired(&self) -> bool {
        is_token_expired(self.access_token.expose_secret())
    }

    /// Expiry decoded from the access token, if it can be decoded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        token_expiry(self.access_token.expose_secret())
    }

    /// Whether the access token has been cleared (after a failed renewal).
    pub fn has_access_token(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
    }

    pub(crate) fn clear_access_token(&mut self) {
        self.access_token = SecretString::from(String::new());
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: i64,
}

/// Decode the `exp` claim of an access token without verifying it.
///
/// Accepts the five-segment Sense form (`t1.v2.<header>.<claims>.<sig>`) and
/// a bare three-segment JWT. Returns `None` for anything else.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let segments: Vec<&str> = token.split('.').collect();
    let claims = match segments.as_slice() {
        [_, _, _, claims, _] | [_, claims, _] => *claims,
        _ => {
            debug!(segments = segments.len(), "malformed access token");
            return None;
        }
    };

    let bytes = match URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')) {
        Ok(b) => b,
        Err(e) => {
            debug!(error = %e, "access token claims are not base64url");
            return None;
        }
    };

    match serde_json::from_slice::<Claims>(&bytes) {
        Ok(c) => DateTime::from_timestamp(c.exp, 0),
        Err(e) => {
            debug!(error = %e, "failed to parse access token claims");
            None
        }
    }
}

/// `true` unless `now` is strictly before the token's embedded expiry.
///
/// Malformed tokens count as expired, forcing a renewal instead of sending
/// a credential the server will reject.
pub fn is_token_expired_at(token: &str, now: DateTime<Utc>) -> bool {
    token_expiry(token).is_none_or(|exp| now >= exp)
}

/// [`is_token_expired_at`] against the system clock.
pub fn is_token_expired(token: &str) -> bool {
    is_token_expired_at(token, Utc::now())
}

// ── Second factor ───────────────────────────────────────────────────

/// Supplies a time-based one-time password when login hits an MFA challenge.
///
/// Called synchronously from inside `login`; a terminal prompt blocks the
/// calling task until the user answers.
pub trait TotpProvider: Send + Sync {
    fn totp_code(&self) -> Result<SecretString, Error>;
}

/// Provider for accounts without MFA. Fails if a challenge shows up anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTotp;

impl TotpProvider for NoTotp {
    fn totp_code(&self) -> Result<SecretString, Error> {
        Err(Error::TwoFactorRequired)
    }
}

/// A code obtained ahead of time (e.g. from a flag or an authenticator export).
#[derive(Debug, Clone)]
pub struct StaticTotp(pub SecretString);

impl TotpProvider for StaticTotp {
    fn totp_code(&self) -> Result<SecretString, Error> {
        Ok(self.0.clone())
    }
}

impl<F> TotpProvider for F
where
    F: Fn() -> Result<SecretString, Error> + Send + Sync,
{
    fn totp_code(&self) -> Result<SecretString, Error> {
        self()
    }
}
