// Integration tests for `RealtimeFeed` against an in-process WebSocket server.
#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use sense_api::{DEVICE_ID, Error, MessageKind, RealtimeFeed, SenseClient, Token};

// ── Helpers ─────────────────────────────────────────────────────────

enum Step {
    Send(Message),
    Close,
}

fn text(value: &serde_json::Value) -> Step {
    Step::Send(Message::text(value.to_string()))
}

fn update(w: f64) -> Step {
    text(&json!({ "type": "realtime_update", "payload": { "w": w, "epoch": 1_700_000_000 } }))
}

/// Serve one scripted connection per entry in `sessions`, in order.
///
/// Returns the base URL and the request URIs seen during the handshakes.
async fn spawn_feed_server(sessions: Vec<Vec<Step>>) -> (Url, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let uris = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&uris);

    tokio::spawn(async move {
        for steps in sessions {
            let (tcp, _) = listener.accept().await.unwrap();
            let seen = Arc::clone(&seen);
            let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                seen.lock().unwrap().push(req.uri().to_string());
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();

            for step in steps {
                match step {
                    Step::Send(msg) => ws.send(msg).await.unwrap(),
                    Step::Close => {
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }
            // Hold the connection until the client lets go.
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    (Url::parse(&format!("ws://{addr}")).unwrap(), uris)
}

fn logged_in_client() -> SenseClient {
    let exp = Utc::now().timestamp() + 3600;
    let claims = URL_SAFE_NO_PAD.encode(json!({ "exp": exp }).to_string());
    let client = SenseClient::with_client(
        reqwest::Client::new(),
        Url::parse("http://127.0.0.1:9/api/v1").unwrap(),
    );
    client.set_token(Token {
        access_token: SecretString::from(format!("t1.v2.eyJhbGciOiJIUzI1NiJ9.{claims}.sig")),
        refresh_token: SecretString::from("refresh"),
        user_id: 22,
        account_id: 11,
        monitor_id: Some(333),
    });
    client
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_one_decodes_and_skips_control_frames() {
    let (base, uris) = spawn_feed_server(vec![vec![
        Step::Send(Message::Ping(vec![1, 2, 3].into())),
        text(&json!({ "type": "hello", "payload": { "online": true } })),
        update(1523.4),
    ]])
    .await;

    let client = logged_in_client();
    let mut feed = RealtimeFeed::new(base);

    let hello = feed.read_one(&client).await.unwrap();
    assert_eq!(hello.kind, MessageKind::Hello);
    assert_eq!(hello.payload.online, Some(true));

    let reading = feed.read_one(&client).await.unwrap();
    assert_eq!(reading.kind, MessageKind::RealtimeUpdate);
    assert_eq!(reading.payload.w, Some(1523.4));
    assert!(feed.is_open());

    let uri = uris.lock().unwrap()[0].clone();
    let parsed = Url::parse(&format!("ws://localhost{uri}")).unwrap();
    assert_eq!(parsed.path(), "/monitors/333/realtimefeed");
    let pairs: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
    assert!(pairs.iter().any(|(k, v)| k == "access_token" && v.starts_with("t1.v2.")));
    assert!(pairs.contains(&("sense_protocol".into(), "8".into())));
    assert!(pairs.contains(&("sense_client_type".into(), "web".into())));
    assert!(pairs.contains(&("sense_device_id".into(), DEVICE_ID.into())));
}

#[tokio::test]
async fn test_reconnects_after_peer_close() {
    let (base, uris) = spawn_feed_server(vec![
        vec![update(100.0), Step::Close],
        vec![update(200.0)],
    ])
    .await;

    let client = logged_in_client();
    let mut feed = RealtimeFeed::new(base);

    assert_eq!(feed.read_one(&client).await.unwrap().payload.w, Some(100.0));

    let err = feed.read_one(&client).await.unwrap_err();
    assert!(matches!(err, Error::WebSocketClosed { .. }), "got {err:?}");
    assert!(!feed.is_open());

    assert_eq!(feed.read_one(&client).await.unwrap().payload.w, Some(200.0));
    assert_eq!(uris.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_bad_frame_keeps_connection() {
    let (base, _uris) = spawn_feed_server(vec![vec![
        Step::Send(Message::text("{ not json")),
        update(42.0),
    ]])
    .await;

    let client = logged_in_client();
    let mut feed = RealtimeFeed::new(base);

    let err = feed.read_one(&client).await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { .. }));
    assert!(feed.is_open());

    assert_eq!(feed.read_one(&client).await.unwrap().payload.w, Some(42.0));
}

#[tokio::test]
async fn test_close_twice() {
    let (base, _uris) = spawn_feed_server(vec![vec![]]).await;

    let client = logged_in_client();
    let mut feed = RealtimeFeed::new(base);

    feed.ensure_open(&client).await.unwrap();
    assert!(feed.is_open());

    feed.close().await.unwrap();
    assert!(!feed.is_open());
    assert!(matches!(feed.close().await, Err(Error::FeedAlreadyClosed)));
}

#[tokio::test]
async fn test_open_requires_monitor() {
    let client = logged_in_client();
    let mut token = client.token().unwrap();
    token.monitor_id = None;
    client.set_token(token);

    let mut feed = RealtimeFeed::new(Url::parse("ws://127.0.0.1:9").unwrap());
    assert!(matches!(
        feed.ensure_open(&client).await,
        Err(Error::NoMonitor)
    ));
}

#[tokio::test]
async fn test_interrupt_aborts_blocked_read() {
    let (base, _uris) = spawn_feed_server(vec![vec![]]).await;

    let client = logged_in_client();
    let mut feed = RealtimeFeed::new(base);
    feed.ensure_open(&client).await.unwrap();

    let control = feed.control();
    assert!(control.is_open());

    let reader = tokio::spawn(async move {
        let result = feed.read_one(&client).await;
        (feed, result)
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    control.interrupt();

    let (feed, result) = tokio::time::timeout(std::time::Duration::from_secs(2), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(result, Err(Error::WebSocketClosed { code: 1000, .. })),
        "got {result:?}"
    );
    assert!(!feed.is_open());
    assert!(!control.is_open());
}
