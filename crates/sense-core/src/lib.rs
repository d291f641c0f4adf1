// sense-core: Session lifecycle and realtime buffering on top of sense-api.

pub mod buffer;
pub mod config;
pub mod error;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use buffer::MessageBuffer;
pub use config::{Credentials, DEFAULT_MESSAGE_CACHE_CAPACITY, SessionConfig, TlsVerification};
pub use error::CoreError;
pub use session::{AsyncReader, Session};

// Re-export the api types consumers handle directly.
pub use sense_api::models::{AlwaysOn, DevicesOverview, TimelineResponse, Trend, TrendScale};
pub use sense_api::{
    MessageKind, NoTotp, RealtimeMessage, RealtimePayload, StaticTotp, Token, TotpProvider,
};
