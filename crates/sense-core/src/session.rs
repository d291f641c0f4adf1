// ── Session facade ──
//
// One authenticated Sense account: the REST client (which owns the token),
// at most one realtime feed connection, and the async message buffer.
// Cheaply cloneable so a background reader and foreground callers share it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sense_api::models::{AlwaysOn, DevicesOverview, TimelineResponse, Trend, TrendScale};
use sense_api::{FeedControl, RealtimeFeed, RealtimeMessage, SenseClient, Token, TotpProvider};

use crate::buffer::MessageBuffer;
use crate::config::{Credentials, SessionConfig};
use crate::error::CoreError;

/// An authenticated session with a live realtime feed.
///
/// Created only by [`authenticate`](Self::authenticate) or
/// [`from_client`](Self::from_client), both of which return either a fully
/// usable session or an error.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    client: SenseClient,
    feed: Mutex<RealtimeFeed>,
    feed_control: Arc<FeedControl>,
    buffer: MessageBuffer,
    reading_async: AtomicBool,
}

impl Session {
    /// Log in and open the realtime feed.
    ///
    /// `totp` is consulted only if the account answers with an MFA
    /// challenge; pass [`sense_api::NoTotp`] for accounts without MFA.
    pub async fn authenticate(
        config: SessionConfig,
        credentials: Credentials,
        totp: &dyn TotpProvider,
    ) -> Result<Self, CoreError> {
        let client = SenseClient::new(config.api_url.clone(), &config.transport())?;
        client
            .login(&credentials.email, &credentials.password, totp)
            .await?;
        debug!(email = %credentials.email, "login successful");

        Self::from_client(config, client).await
    }

    /// Wrap a client that already holds a token, and open the feed.
    pub async fn from_client(config: SessionConfig, client: SenseClient) -> Result<Self, CoreError> {
        let mut feed = RealtimeFeed::new(config.realtime_url.clone());
        feed.ensure_open(&client).await?;

        let feed_control = feed.control();
        let buffer = MessageBuffer::new(config.effective_capacity());
        info!(monitor_id = ?client.monitor_id(), "session established");

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                client,
                feed: Mutex::new(feed),
                feed_control,
                buffer,
                reading_async: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The underlying REST client.
    pub fn client(&self) -> &SenseClient {
        &self.inner.client
    }

    // ── Token ────────────────────────────────────────────────────────

    /// Snapshot of the current token.
    pub fn token(&self) -> Option<Token> {
        self.inner.client.token()
    }

    pub fn monitor_id(&self) -> Option<i64> {
        self.inner.client.monitor_id()
    }

    /// Exchange the refresh token for a new access token now.
    ///
    /// An open feed keeps running on the token it was opened with; the next
    /// reconnect picks up the new one.
    pub async fn renew_token(&self) -> Result<(), CoreError> {
        self.inner.client.renew().await?;
        Ok(())
    }

    // ── REST pass-throughs ───────────────────────────────────────────

    pub async fn always_on(&self) -> Result<AlwaysOn, CoreError> {
        Ok(self.inner.client.always_on().await?)
    }

    pub async fn devices_overview(&self, include_merged: bool) -> Result<DevicesOverview, CoreError> {
        Ok(self.inner.client.devices_overview(include_merged).await?)
    }

    /// Latest timeline events; zero asks for the default of 30.
    pub async fn timeline(&self, n_items: u32) -> Result<TimelineResponse, CoreError> {
        Ok(self.inner.client.timeline(n_items).await?)
    }

    pub async fn trend(&self, scale: TrendScale, start: DateTime<Utc>) -> Result<Trend, CoreError> {
        Ok(self.inner.client.trend(scale, start).await?)
    }

    // ── Realtime feed ────────────────────────────────────────────────

    /// Whether the feed currently holds a connection. Never waits on a read
    /// in flight.
    pub fn is_connected(&self) -> bool {
        self.inner.feed_control.is_open()
    }

    /// Read one message, reconnecting first if the feed dropped.
    ///
    /// Blocks until a frame arrives; wrap in `tokio::time::timeout` for a
    /// deadline.
    pub async fn read_message(&self) -> Result<RealtimeMessage, CoreError> {
        let mut feed = self.inner.feed.lock().await;
        Ok(feed.read_one(&self.inner.client).await?)
    }

    /// Read messages into the buffer until `stop` is cancelled or a read
    /// fails.
    ///
    /// `stop` is checked before each read; a read already waiting on the
    /// socket finishes first. Any read error ends the loop and is returned,
    /// unless stop had already been requested.
    /// Running two readers on one session is not supported.
    pub async fn start_async_read(&self, stop: CancellationToken) -> Result<(), CoreError> {
        self.inner.reading_async.store(true, Ordering::SeqCst);
        info!("async reader started");

        let result = loop {
            if stop.is_cancelled() {
                debug!("async reader stop requested");
                break Ok(());
            }

            match self.read_message().await {
                Ok(message) => {
                    let evicted = self.inner.buffer.push(message);
                    if evicted > 0 {
                        debug!(evicted, "message buffer full, dropped oldest");
                    }
                }
                Err(e) if stop.is_cancelled() => {
                    debug!(error = %e, "async reader read ended after stop request");
                    break Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "async reader terminated");
                    break Err(e);
                }
            }
        };

        self.inner.reading_async.store(false, Ordering::SeqCst);
        info!("async reader stopped");
        result
    }

    /// Run [`start_async_read`](Self::start_async_read) on a spawned task.
    pub fn spawn_async_read(&self) -> AsyncReader {
        let stop = CancellationToken::new();
        // Set before spawning so an immediate drain sees the reader.
        self.inner.reading_async.store(true, Ordering::SeqCst);

        let session = self.clone();
        let token = stop.clone();
        let handle = tokio::spawn(async move { session.start_async_read(token).await });

        AsyncReader { stop, handle }
    }

    /// Take all buffered messages, oldest first.
    ///
    /// Fails with [`CoreError::AsyncReadNotStarted`] unless a background
    /// reader is running. If the reader is between reads the feed is
    /// reopened here when it has dropped.
    pub async fn drain_cached(&self) -> Result<Vec<RealtimeMessage>, CoreError> {
        if !self.is_reading_async() {
            return Err(CoreError::AsyncReadNotStarted);
        }

        if let Ok(mut feed) = self.inner.feed.try_lock() {
            feed.ensure_open(&self.inner.client).await?;
        }

        Ok(self.inner.buffer.drain())
    }

    /// Messages buffered and not yet drained.
    pub fn pending_messages(&self) -> usize {
        self.inner.buffer.len()
    }

    /// Messages evicted from the buffer because it was full.
    pub fn dropped_messages(&self) -> u64 {
        self.inner.buffer.dropped()
    }

    pub fn is_reading_async(&self) -> bool {
        self.inner.reading_async.load(Ordering::SeqCst)
    }

    /// Close the feed connection. The token stays valid.
    ///
    /// A read waiting on the socket is interrupted first, so this never
    /// blocks behind a quiet feed. A running async reader ends with
    /// [`CoreError::FeedDisconnected`] unless it was stopped beforehand.
    pub async fn close(&self) -> Result<(), CoreError> {
        let was_open = self.inner.feed_control.is_open();
        self.inner.feed_control.interrupt();

        let mut feed = self.inner.feed.lock().await;
        match feed.close().await {
            // The interrupted reader already dropped the connection.
            Err(sense_api::Error::FeedAlreadyClosed) if was_open => Ok(()),
            other => Ok(other?),
        }
    }
}

// ── AsyncReader ──────────────────────────────────────────────────────

/// Handle to a reader started with [`Session::spawn_async_read`].
pub struct AsyncReader {
    stop: CancellationToken,
    handle: JoinHandle<Result<(), CoreError>>,
}

impl AsyncReader {
    /// Ask the reader to stop after its current read.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the reader and return how it ended.
    pub async fn join(self) -> Result<(), CoreError> {
        self.handle
            .await
            .map_err(|e| CoreError::Internal(format!("async reader task failed: {e}")))?
    }
}
