// ── Runtime session configuration ──
//
// These types describe *where* and *how* to reach the Sense cloud. They
// carry credential data and connection tuning, but never touch disk.
// `sense-config` (or an embedding application) builds a `SessionConfig`
// and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use sense_api::transport::{TlsMode, TransportConfig};

/// Messages retained by the async buffer when nothing else is configured.
pub const DEFAULT_MESSAGE_CACHE_CAPACITY: usize = 200;

/// Account credentials for the primary login.
///
/// Used once by [`Session::authenticate`](crate::Session::authenticate) and
/// then dropped; the session keeps only the issued token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<SecretString>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// TLS verification strategy for REST requests.
///
/// The realtime feed always verifies against the bundled webpki roots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store.
    #[default]
    SystemDefaults,
    /// Additional CA certificate file (PEM).
    CustomCa(PathBuf),
}

/// Configuration for one Sense session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// REST base, e.g. `https://api.sense.com/apiservice/api/v1`.
    pub api_url: Url,
    /// Realtime host, e.g. `wss://clientrt.sense.com`.
    pub realtime_url: Url,
    /// TLS verification for REST calls only; see [`TlsVerification`].
    pub tls: TlsVerification,
    /// HTTP request timeout. The realtime feed has no read timeout.
    pub timeout: Duration,
    /// Upper bound on buffered realtime messages. Values below 1 act as 1.
    pub message_cache_capacity: usize,
}

impl SessionConfig {
    /// Transport settings for the REST client.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: match &self.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            },
            timeout: self.timeout,
        }
    }

    /// Buffer capacity after clamping.
    pub fn effective_capacity(&self) -> usize {
        self.message_cache_capacity.max(1)
    }

    /// A config for the given endpoints with default tuning.
    pub fn new(api_url: Url, realtime_url: Url) -> Self {
        Self {
            api_url,
            realtime_url,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            message_cache_capacity: DEFAULT_MESSAGE_CACHE_CAPACITY,
        }
    }

    /// A config for the production Sense endpoints.
    pub fn production() -> Result<Self, url::ParseError> {
        Ok(Self::new(
            Url::parse(sense_api::DEFAULT_API_URL)?,
            Url::parse(sense_api::DEFAULT_REALTIME_URL)?,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_production() {
        let config = SessionConfig::production().unwrap();
        assert_eq!(config.api_url.host_str(), Some("api.sense.com"));
        assert_eq!(config.realtime_url.scheme(), "wss");
        assert_eq!(config.message_cache_capacity, 200);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let config = SessionConfig {
            message_cache_capacity: 0,
            ..SessionConfig::production().unwrap()
        };
        assert_eq!(config.effective_capacity(), 1);
    }

    #[test]
    fn custom_ca_reaches_transport() {
        let config = SessionConfig {
            tls: TlsVerification::CustomCa(PathBuf::from("/etc/ssl/proxy.pem")),
            ..SessionConfig::production().unwrap()
        };
        assert!(matches!(config.transport().tls, TlsMode::CustomCa(p) if p.ends_with("proxy.pem")));
    }
}
