//! Shared configuration for Sense tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! a terminal TOTP prompt, tracing setup, and translation to
//! `sense_core::SessionConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

use sense_api::TotpProvider;
use sense_core::{Credentials, DEFAULT_MESSAGE_CACHE_CAPACITY, SessionConfig, TlsVerification};

/// Keyring service name for stored passwords.
const KEYRING_SERVICE: &str = "sense";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' not found in config")]
    ProfileNotFound { profile: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|p| (name.to_owned(), p))
            .ok_or_else(|| ConfigError::ProfileNotFound {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Realtime messages kept by the async buffer.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    DEFAULT_MESSAGE_CACHE_CAPACITY
}

/// A named Sense account profile.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email.
    pub email: Option<String>,

    /// Password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Override the REST base URL.
    pub api_url: Option<String>,

    /// Override the realtime feed host.
    pub realtime_url: Option<String>,

    /// Extra CA certificate for REST calls (e.g. behind a TLS-inspecting
    /// proxy). The realtime feed keeps the bundled roots.
    pub ca_cert: Option<PathBuf>,

    /// Override timeout.
    pub timeout: Option<u64>,

    /// Override the message cache capacity.
    pub cache_capacity: Option<usize>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "sense", "sense").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("sense");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load Config from `path` + environment.
///
/// Environment variables use a `SENSE_` prefix and `__` between nesting
/// levels, e.g. `SENSE_PROFILES__HOME__EMAIL` or `SENSE_DEFAULTS__TIMEOUT`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SENSE_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_user(profile_name: &str) -> String {
    format!("{profile_name}/password")
}

fn keyring_password(profile_name: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))
        .and_then(|entry| entry.get_password())
        .ok()
}

/// Store a profile's password in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(profile_name))
        .and_then(|entry| entry.set_password(password))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve the account email: profile, then `SENSE_EMAIL`.
pub fn resolve_email(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .email
        .clone()
        .or_else(|| std::env::var("SENSE_EMAIL").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve the password from the credential chain.
///
/// 1. the variable named by `password_env`
/// 2. `SENSE_PASSWORD`
/// 3. system keyring (`sense` / `<profile>/password`)
/// 4. plaintext `password` in the profile
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_password_with(
        profile,
        profile_name,
        |name| std::env::var(name).ok(),
        keyring_password,
    )
}

fn resolve_password_with(
    profile: &Profile,
    profile_name: &str,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<SecretString, ConfigError> {
    if let Some(pw) = profile.password_env.as_deref().and_then(&env) {
        return Ok(SecretString::from(pw));
    }

    if let Some(pw) = env("SENSE_PASSWORD") {
        return Ok(SecretString::from(pw));
    }

    if let Some(pw) = keyring(profile_name) {
        return Ok(SecretString::from(pw));
    }

    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Resolve email and password into login `Credentials`.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    let email = resolve_email(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;
    Ok(Credentials { email, password })
}

// ── SessionConfig translation ───────────────────────────────────────

fn parse_url(field: &str, raw: Option<&str>, fallback: &str) -> Result<Url, ConfigError> {
    let raw = raw.unwrap_or(fallback);
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// Build a `SessionConfig` from a profile and the global defaults.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let api_url = parse_url("api_url", profile.api_url.as_deref(), sense_api::DEFAULT_API_URL)?;
    let realtime_url = parse_url(
        "realtime_url",
        profile.realtime_url.as_deref(),
        sense_api::DEFAULT_REALTIME_URL,
    )?;

    if !matches!(realtime_url.scheme(), "ws" | "wss") {
        return Err(ConfigError::Validation {
            field: "realtime_url".into(),
            reason: format!("expected a ws:// or wss:// URL, got '{realtime_url}'"),
        });
    }

    let tls = profile
        .ca_cert
        .clone()
        .map_or(TlsVerification::SystemDefaults, TlsVerification::CustomCa);

    let mut config = SessionConfig::new(api_url, realtime_url);
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.message_cache_capacity = profile.cache_capacity.unwrap_or(defaults.cache_capacity);
    Ok(config)
}

// ── Terminal TOTP prompt ────────────────────────────────────────────

/// Asks for the authenticator code on the terminal when login hits an
/// MFA challenge.
#[derive(Debug, Clone)]
pub struct TerminalTotpPrompt {
    prompt: String,
}

impl Default for TerminalTotpPrompt {
    fn default() -> Self {
        Self {
            prompt: "Sense verification code".into(),
        }
    }
}

impl TerminalTotpPrompt {
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl TotpProvider for TerminalTotpPrompt {
    fn totp_code(&self) -> Result<SecretString, sense_api::Error> {
        let code = dialoguer::Password::new()
            .with_prompt(&self.prompt)
            .validate_with(|input: &String| -> Result<(), &str> {
                if !input.is_empty() && input.trim().chars().all(|c| c.is_ascii_digit()) {
                    Ok(())
                } else {
                    Err("the code is the digits shown by your authenticator app")
                }
            })
            .interact()
            .map_err(|e| {
                debug!(error = %e, "TOTP prompt failed");
                sense_api::Error::TwoFactorRequired
            })?;
        Ok(SecretString::from(code.trim().to_owned()))
    }
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a fmt subscriber honoring `RUST_LOG`, falling back to a level
/// picked by `verbosity` (0 = warn .. 3+ = trace).
///
/// Returns `false` if a global subscriber was already set.
pub fn init_tracing(verbosity: u8) -> bool {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .try_init()
        .is_ok()
}
