// sense-api: Async Rust client for the Sense energy monitor cloud (REST + realtime feed)

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod error;
pub mod models;
pub mod realtime;
pub mod token;
pub mod transport;

pub use client::{DEFAULT_API_URL, SenseClient};
pub use error::Error;
pub use models::{MessageKind, RealtimeMessage, RealtimePayload, TrendScale};
pub use realtime::{DEFAULT_REALTIME_URL, FeedControl, RealtimeFeed};
pub use token::{
    NoTotp, StaticTotp, Token, TotpProvider, is_token_expired, is_token_expired_at, token_expiry,
};
pub use transport::{TlsMode, TransportConfig};

/// Installation id sent with every request and on the realtime feed.
///
/// The service expects a stable opaque identifier per client install; this
/// one is shared by all users of the crate.
pub const DEVICE_ID: &str = "dnccvg0pzp62lmdotpg2hho0q7333ihzccpr6ifijc5lh9kigzc7m6jcovy8avq4wb2c40u0tsygwzi3vcj9lkmn0v7wjar36r5tvdqjqcfbtcrqaawfemmvmtamahg2";
