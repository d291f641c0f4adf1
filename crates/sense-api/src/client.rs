// Sense REST client
//
// Owns the HTTP client, the API base URL, and the current token. Every
// authenticated request goes through `get`, which renews an expired access
// token first. Login/MFA/renew live in `auth.rs`, resource endpoints in
// `endpoints.rs`, both as inherent methods on `SenseClient`.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use reqwest::header::{AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::DEVICE_ID;
use crate::error::Error;
use crate::token::Token;
use crate::transport::TransportConfig;

/// Production REST base.
pub const DEFAULT_API_URL: &str = "https://api.sense.com/apiservice/api/v1";

/// Header naming the client installation on every request.
pub const DEVICE_ID_HEADER: &str = "x-sense-device-id";

/// Raw HTTP client for the Sense cloud API.
///
/// Holds the token behind a lock so a background feed reader and foreground
/// REST callers can share one client. The lock is never held across a
/// network call.
pub struct SenseClient {
    http: reqwest::Client,
    api_url: Url,
    token: RwLock<Option<Token>>,
}

impl SenseClient {
    /// Create a client for `api_url` from a `TransportConfig`.
    pub fn new(api_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, api_url))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, api_url: Url) -> Self {
        Self {
            http,
            api_url,
            token: RwLock::new(None),
        }
    }

    /// The REST base URL.
    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    // ── Token store ──────────────────────────────────────────────────

    fn read_token(&self) -> RwLockReadGuard<'_, Option<Token>> {
        self.token.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_token(&self) -> RwLockWriteGuard<'_, Option<Token>> {
        self.token.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current token, if logged in.
    pub fn token(&self) -> Option<Token> {
        self.read_token().clone()
    }

    /// Install a token obtained elsewhere (e.g. restored from storage).
    pub fn set_token(&self, token: Token) {
        *self.write_token() = Some(token);
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_token().is_some()
    }

    pub fn user_id(&self) -> Option<i64> {
        self.read_token().as_ref().map(|t| t.user_id)
    }

    /// Primary monitor id; keys the realtime feed and monitor endpoints.
    pub fn monitor_id(&self) -> Option<i64> {
        self.read_token().as_ref().and_then(|t| t.monitor_id)
    }

    /// Current access token, if one is held and not cleared.
    pub fn access_token(&self) -> Option<SecretString> {
        self.read_token()
            .as_ref()
            .filter(|t| t.has_access_token())
            .map(|t| t.access_token.clone())
    }

    /// Make sure the access token is usable, renewing it once if not.
    ///
    /// An expired (or previously cleared) access token is dropped before
    /// renewal so it can never be sent. If renewal fails the caller gets
    /// [`Error::TokenExpired`] and no request is attempted.
    pub async fn ensure_fresh_token(&self) -> Result<(), Error> {
        let expired = match self.read_token().as_ref() {
            Some(token) => token.is_expired(),
            None => return Err(Error::NotAuthenticated),
        };
        if !expired {
            return Ok(());
        }

        debug!("access token expired, renewing");
        if let Some(token) = self.write_token().as_mut() {
            token.clear_access_token();
        }

        self.renew().await.map_err(|e| {
            warn!(error = %e, "token renewal failed");
            Error::TokenExpired
        })
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{api_url}/{path}`.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn bearer(&self) -> Result<HeaderValue, Error> {
        let access = self.access_token().ok_or(Error::NotAuthenticated)?;
        let mut value = HeaderValue::from_str(&format!("bearer {}", access.expose_secret()))
            .map_err(|e| Error::Authentication {
                message: format!("access token is not a valid header value: {e}"),
            })?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Authenticated GET. Renews an expired token first (one attempt).
    pub(crate) async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        self.ensure_fresh_token().await?;
        let bearer = self.bearer()?;

        debug!("GET {}", url.path());

        let resp = self
            .http
            .get(url)
            .header(DEVICE_ID_HEADER, DEVICE_ID)
            .header(AUTHORIZATION, bearer)
            .send()
            .await?;

        parse_response(resp).await
    }

    /// Unauthenticated form POST used by the login and renewal endpoints.
    ///
    /// These endpoints report rejection (and MFA challenges) in a JSON body
    /// alongside a 4xx status, so the body is decoded whatever the status.
    pub(crate) async fn post_form<T: DeserializeOwned>(
        &self,
        url: Url,
        form: &[(&str, &str)],
    ) -> Result<T, Error> {
        debug!("POST {}", url.path());

        let resp = self
            .http
            .post(url)
            .header(DEVICE_ID_HEADER, DEVICE_ID)
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                deserialization_error(&e, body.clone())
            } else {
                Error::Authentication {
                    message: format!("HTTP {status}: {}", preview(&body)),
                }
            }
        })
    }
}

/// Map status codes, then decode the JSON body.
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "access token rejected (HTTP 401)".into(),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Api {
            status: status.as_u16(),
            message: preview(&body).to_owned(),
        });
    }

    let body = resp.text().await?;
    serde_json::from_str(&body).map_err(|e| deserialization_error(&e, body.clone()))
}

fn deserialization_error(e: &serde_json::Error, body: String) -> Error {
    Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body,
    }
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(base: &str) -> SenseClient {
        SenseClient::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn endpoint_appends_to_versioned_base() {
        let c = client(DEFAULT_API_URL);
        assert_eq!(
            c.endpoint("authenticate").unwrap().as_str(),
            "https://api.sense.com/apiservice/api/v1/authenticate"
        );
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let c = client("http://127.0.0.1:9999/api/v1/");
        assert_eq!(
            c.endpoint("renew").unwrap().as_str(),
            "http://127.0.0.1:9999/api/v1/renew"
        );
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "é".repeat(300);
        assert_eq!(preview(&long).chars().count(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn fresh_token_requires_login() {
        let c = client(DEFAULT_API_URL);
        assert!(!c.is_authenticated());
        assert!(matches!(
            c.ensure_fresh_token().await,
            Err(Error::NotAuthenticated)
        ));
    }
}
