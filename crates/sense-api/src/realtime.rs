//! Realtime power feed over WebSocket.
//!
//! The Sense service pushes one JSON [`RealtimeMessage`] per frame on
//! `monitors/{id}/realtimefeed`. [`RealtimeFeed`] owns at most one such
//! connection and opens it lazily:
//!
//! ```text
//! absent ──ensure_open──▶ open ──peer close / read error──▶ absent
//!                           ├──────────interrupt()────────▶ absent
//!                           └──────────close()────────────▶ absent
//! ```
//!
//! Liveness is never probed. A connection that exists is assumed healthy
//! until a read fails, at which point the reference is dropped and the next
//! [`ensure_open`](RealtimeFeed::ensure_open) dials a fresh one using the
//! client's current (renewed if necessary) access token.
//!
//! The feed URL carries the access token as a query parameter, so it is
//! never logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::DEVICE_ID;
use crate::client::SenseClient;
use crate::error::Error;
use crate::models::RealtimeMessage;

/// Production realtime host.
pub const DEFAULT_REALTIME_URL: &str = "wss://clientrt.sense.com";

/// Feed protocol revision the client speaks.
pub const SENSE_PROTOCOL: &str = "8";

/// Client type reported to the feed.
pub const CLIENT_TYPE: &str = "web";

/// Status reported when the caller interrupts a read.
const NORMAL_CLOSURE: u16 = 1000;

/// Status reported when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the feed URL for `monitor_id` under `base`.
///
/// `{base}/monitors/{id}/realtimefeed?access_token=..&sense_protocol=8&sense_client_type=web&sense_device_id=..`
pub fn feed_url(base: &Url, monitor_id: i64, access_token: &SecretString) -> Result<Url, Error> {
    let base = base.as_str().trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}/monitors/{monitor_id}/realtimefeed"))?;
    url.query_pairs_mut()
        .append_pair("access_token", access_token.expose_secret())
        .append_pair("sense_protocol", SENSE_PROTOCOL)
        .append_pair("sense_client_type", CLIENT_TYPE)
        .append_pair("sense_device_id", DEVICE_ID);
    Ok(url)
}

/// Cross-task view of a [`RealtimeFeed`]: whether it holds a connection,
/// and a way to abort the read in flight without taking the feed's lock.
#[derive(Debug, Default)]
pub struct FeedControl {
    open: AtomicBool,
    interrupt: Mutex<CancellationToken>,
}

impl FeedControl {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Abort the read currently waiting on the socket, if any. The reader
    /// drops the connection and returns [`Error::WebSocketClosed`].
    pub fn interrupt(&self) {
        self.token().cancel();
    }

    fn token(&self) -> CancellationToken {
        self.interrupt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fresh token for a new connection; earlier interrupts do not carry over.
    fn arm(&self) {
        *self.interrupt.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();
        self.open.store(true, Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Lazily (re)connecting handle on the realtime feed.
pub struct RealtimeFeed {
    base_url: Url,
    stream: Option<FeedStream>,
    control: Arc<FeedControl>,
}

impl RealtimeFeed {
    /// A feed with no connection yet. Nothing is dialed until the first
    /// [`ensure_open`](Self::ensure_open) or [`read_one`](Self::read_one).
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            stream: None,
            control: Arc::new(FeedControl::default()),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether a connection is currently held.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Shared handle for checking and interrupting the feed from other tasks.
    pub fn control(&self) -> Arc<FeedControl> {
        Arc::clone(&self.control)
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.control.disarm();
    }

    /// Open the connection if none is held.
    ///
    /// Renews the access token first when it has expired; a failed renewal
    /// surfaces as [`Error::TokenExpired`] and nothing is dialed. An existing
    /// connection is returned as-is.
    pub async fn ensure_open(&mut self, client: &SenseClient) -> Result<(), Error> {
        if self.stream.is_some() {
            return Ok(());
        }

        client.ensure_fresh_token().await?;
        let monitor_id = client.monitor_id().ok_or(Error::NoMonitor)?;
        let access = client.access_token().ok_or(Error::NotAuthenticated)?;
        let url = feed_url(&self.base_url, monitor_id, &access)?;

        debug!(monitor_id, "opening realtime feed");
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

        info!(monitor_id, "realtime feed connected");
        self.stream = Some(stream);
        self.control.arm();
        Ok(())
    }

    /// Read and decode the next message, connecting first if needed.
    ///
    /// Ping/pong and raw frames are skipped. Any transport failure drops the
    /// connection so the following call reconnects, as does
    /// [`FeedControl::interrupt`]. A frame that fails to decode is reported
    /// but leaves the connection open.
    pub async fn read_one(&mut self, client: &SenseClient) -> Result<RealtimeMessage, Error> {
        self.ensure_open(client).await?;
        let interrupt = self.control.token();

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(Error::FeedAlreadyClosed);
            };

            let next = tokio::select! {
                biased;
                () = interrupt.cancelled() => None,
                frame = stream.next() => Some(frame),
            };
            let Some(next) = next else {
                self.drop_stream();
                info!("realtime read interrupted, connection dropped");
                return Err(Error::WebSocketClosed {
                    code: NORMAL_CLOSURE,
                    reason: "closed by client".into(),
                });
            };

            match next {
                Some(Ok(Message::Text(text))) => return decode(text.as_bytes()),
                Some(Ok(Message::Binary(data))) => return decode(&data),
                Some(Ok(Message::Close(frame))) => {
                    self.drop_stream();
                    let (code, reason) = frame.map_or((ABNORMAL_CLOSURE, String::new()), |cf| {
                        (u16::from(cf.code), cf.reason.to_string())
                    });
                    info!(code, %reason, "realtime feed closed by peer");
                    return Err(Error::WebSocketClosed { code, reason });
                }
                Some(Ok(other)) => {
                    trace!(?other, "skipping control frame");
                }
                Some(Err(e)) => {
                    self.drop_stream();
                    debug!(error = %e, "realtime feed read failed");
                    return Err(Error::WebSocketRead(e.to_string()));
                }
                None => {
                    self.drop_stream();
                    info!("realtime feed ended without close frame");
                    return Err(Error::WebSocketClosed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".into(),
                    });
                }
            }
        }
    }

    /// Close the connection with a normal close frame.
    ///
    /// Fails with [`Error::FeedAlreadyClosed`] when nothing is open. The
    /// reference is dropped even if the close handshake itself fails.
    pub async fn close(&mut self) -> Result<(), Error> {
        let mut stream = self.stream.take().ok_or(Error::FeedAlreadyClosed)?;
        self.control.disarm();

        match stream.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                info!("realtime feed closed");
                Ok(())
            }
            Err(e) => Err(Error::WebSocketRead(format!("close handshake failed: {e}"))),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<RealtimeMessage, Error> {
    serde_json::from_slice(bytes).map_err(|e| {
        let body = String::from_utf8_lossy(bytes).into_owned();
        warn!(error = %e, "undecodable realtime frame");
        Error::Deserialization {
            message: format!("invalid realtime frame: {e}"),
            body,
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_carries_protocol_params() {
        let base = Url::parse(DEFAULT_REALTIME_URL).unwrap();
        let url = feed_url(&base, 4242, &SecretString::from("tok")).unwrap();

        assert_eq!(url.host_str(), Some("clientrt.sense.com"));
        assert_eq!(url.path(), "/monitors/4242/realtimefeed");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("access_token".into(), "tok".into()));
        assert!(pairs.contains(&("sense_protocol".into(), "8".into())));
        assert!(pairs.contains(&("sense_client_type".into(), "web".into())));
        assert!(pairs.contains(&("sense_device_id".into(), DEVICE_ID.into())));
    }

    #[test]
    fn undecodable_frame_keeps_body() {
        let err = decode(b"not json").unwrap_err();
        match err {
            Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn close_without_connection_fails() {
        let mut feed = RealtimeFeed::new(Url::parse(DEFAULT_REALTIME_URL).unwrap());
        assert!(!feed.is_open());
        assert!(matches!(feed.close().await, Err(Error::FeedAlreadyClosed)));
    }
}
