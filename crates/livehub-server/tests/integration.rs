//! End-to-end integration tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::{SinkExt, StreamExt};
use livehub_core::Topic;
use livehub_server::{
    AllowAll, Authenticator, LiveHubServer, ServerConfig, StaticTokenAuthenticator,
};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on a free port and return its WS URL.
async fn boot_server(
    config: ServerConfig,
    auth: Arc<dyn Authenticator>,
) -> (String, Arc<LiveHubServer>) {
    let server = Arc::new(LiveHubServer::new(config, auth));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn boot_default() -> (String, Arc<LiveHubServer>) {
    boot_server(ServerConfig::default(), Arc::new(AllowAll)).await
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON text frame, skipping protocol frames.
async fn read_json(ws: &mut WsStream) -> Value {
    timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Assert no JSON frame arrives within `wait`.
async fn assert_silent(ws: &mut WsStream, wait: Duration) {
    let result = timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await;
    assert!(result.is_err(), "expected silence, got {result:?}");
}

/// Poll `check` until it holds or the test timeout elapses.
async fn eventually(check: impl Fn() -> bool) {
    timeout(TIMEOUT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

#[tokio::test]
async fn subscriber_receives_topic_update_and_bystander_does_not() {
    let (url, server) = boot_default().await;
    let mut c1 = connect(&url).await;
    let mut c2 = connect(&url).await;

    send_json(&mut c1, json!({"type": "subscribe", "metrics": ["users"]})).await;
    let registry = server.registry().clone();
    eventually(|| registry.subscribers_of("users").len() == 1).await;
    assert_eq!(server.registry().connection_count(), 2);

    let report = server
        .broadcaster()
        .broadcast_topic(Topic::from("users"), json!({"count": 5}))
        .await;
    assert_eq!(report.delivered, 1);

    let frame = read_json(&mut c1).await;
    assert_eq!(frame["type"], "analytics_update");
    assert_eq!(frame["metric"], "users");
    assert_eq!(frame["data"], json!({"count": 5}));
    assert!(frame["time"].is_i64());

    assert_silent(&mut c2, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let (url, server) = boot_default().await;
    let mut c1 = connect(&url).await;
    let registry = server.registry().clone();

    send_json(&mut c1, json!({"type": "subscribe", "metrics": ["users", "videos"]})).await;
    eventually(|| registry.topic_count() == 2).await;
    send_json(&mut c1, json!({"type": "unsubscribe", "metrics": ["users"]})).await;
    eventually(|| registry.subscribers_of("users").is_empty()).await;

    let _ = server
        .broadcaster()
        .broadcast_topic(Topic::from("users"), json!(1))
        .await;
    let _ = server
        .broadcaster()
        .broadcast_topic(Topic::from("videos"), json!(2))
        .await;

    let frame = read_json(&mut c1).await;
    assert_eq!(frame["metric"], "videos");
}

#[tokio::test]
async fn client_ping_gets_pong() {
    let (url, _server) = boot_default().await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "ping"})).await;
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "pong");
    assert!(frame["timestamp"].is_i64());
}

#[tokio::test]
async fn bad_frames_get_error_replies_and_connection_survives() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;

    send_json(&mut ws, json!({"type": "replay", "from": 0})).await;
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["message"], "unknown message type: replay");

    ws.send(Message::Text("{not json".into())).await.unwrap();
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "error");

    send_json(&mut ws, json!({"type": "ping"})).await;
    assert_eq!(read_json(&mut ws).await["type"], "pong");
    assert_eq!(server.registry().connection_count(), 1);
}

#[tokio::test]
async fn binary_frames_are_routed() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;

    ws.send(Message::Binary(
        br#"{"type":"subscribe","metrics":["cpu"]}"#.to_vec().into(),
    ))
    .await
    .unwrap();
    let registry = server.registry().clone();
    eventually(|| registry.subscribers_of("cpu").len() == 1).await;
}

#[tokio::test]
async fn broadcast_all_reaches_everyone() {
    let (url, server) = boot_default().await;
    let mut c1 = connect(&url).await;
    let mut c2 = connect(&url).await;
    let registry = server.registry().clone();
    eventually(|| registry.connection_count() == 2).await;

    let report = server.broadcaster().broadcast_all(json!({"ok": true})).await;
    assert_eq!(report.delivered, 2);

    for ws in [&mut c1, &mut c2] {
        let frame = read_json(ws).await;
        assert_eq!(frame["type"], "system_health");
        assert_eq!(frame["data"]["ok"], true);
    }
}

#[tokio::test]
async fn disconnect_removes_from_both_registries() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;
    let registry = server.registry().clone();

    send_json(&mut ws, json!({"type": "subscribe", "metrics": ["users"]})).await;
    eventually(|| registry.subscribers_of("users").len() == 1).await;

    ws.close(None).await.unwrap();
    eventually(|| registry.connection_count() == 0).await;
    assert!(registry.subscribers_of("users").is_empty());
    assert_eq!(registry.topic_count(), 0);
    assert!(registry.is_consistent());

    let report = server
        .broadcaster()
        .broadcast_topic(Topic::from("users"), json!(1))
        .await;
    assert_eq!(report.recipients, 0);
}

#[tokio::test]
async fn bad_token_is_rejected_before_upgrade() {
    let auth = Arc::new(StaticTokenAuthenticator::new([("ops", "s3cret")], false));
    let (url, server) = boot_server(ServerConfig::default(), auth).await;

    let err = connect_async(format!("{url}?token=mock-123"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert_eq!(server.registry().connection_count(), 0);

    let (_ws, _) = connect_async(format!("{url}?token=s3cret")).await.unwrap();
    let registry = server.registry().clone();
    eventually(|| registry.connection_count() == 1).await;
    let snapshot = server.registry().snapshot();
    assert_eq!(snapshot[0].principal.subject(), Some("ops"));
}

#[tokio::test]
async fn silent_client_is_torn_down_after_read_deadline() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(200),
        pong_wait: Duration::from_millis(500),
        ..ServerConfig::default()
    };
    let (url, server) = boot_server(config, Arc::new(AllowAll)).await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({"type": "subscribe", "metrics": ["users"]})).await;
    let registry = server.registry().clone();
    eventually(|| registry.subscribers_of("users").len() == 1).await;

    // Never read, so the client never answers the server's pings.
    eventually(|| registry.connection_count() == 0).await;
    assert!(registry.subscribers_of("users").is_empty());
    drop(ws);
}

#[tokio::test]
async fn responsive_client_outlives_read_deadline() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(200),
        pong_wait: Duration::from_millis(500),
        ..ServerConfig::default()
    };
    let (url, server) = boot_server(config, Arc::new(AllowAll)).await;
    let mut ws = connect(&url).await;

    // Reading lets the client answer pings automatically.
    assert_silent(&mut ws, Duration::from_millis(1500)).await;
    assert_eq!(server.registry().connection_count(), 1);
}

#[tokio::test]
async fn stalled_reader_leaves_registries_at_read_deadline() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(200),
        pong_wait: Duration::from_millis(500),
        write_timeout: Duration::from_secs(4),
        ..ServerConfig::default()
    };
    let (url, server) = boot_server(config, Arc::new(AllowAll)).await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({"type": "subscribe", "metrics": ["big"]})).await;
    let registry = server.registry().clone();
    eventually(|| registry.subscribers_of("big").len() == 1).await;

    // The client never reads, so these back up into both socket buffers and
    // leave the writer stuck mid-send.
    let payload = "x".repeat(4 << 20);
    for _ in 0..8 {
        let _ = server
            .broadcaster()
            .broadcast_topic(Topic::from("big"), json!(payload))
            .await;
    }

    // Well inside one write timeout.
    let gone = timeout(Duration::from_secs(2), async {
        while registry.connection_count() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "stalled reader still registered");
    assert!(registry.subscribers_of("big").is_empty());
    assert!(registry.is_consistent());
    drop(ws);
}

#[tokio::test]
async fn concurrent_upgrades_respect_max_connections() {
    let config = ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    };
    let (url, server) = boot_server(config, Arc::new(AllowAll)).await;

    let attempts = join_all((0..8).map(|_| connect_async(url.clone()))).await;
    let mut accepted = Vec::new();
    for attempt in attempts {
        match attempt {
            Ok((ws, _)) => accepted.push(ws),
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status(), 503),
            Err(other) => panic!("unexpected connect error: {other:?}"),
        }
    }
    assert_eq!(accepted.len(), 2);
    let registry = server.registry().clone();
    eventually(|| registry.connection_count() == 2).await;

    // Closing one session frees its slot.
    let mut first = accepted.remove(0);
    first.close(None).await.unwrap();
    eventually(|| registry.connection_count() == 1).await;
    let replacement = timeout(TIMEOUT, async {
        loop {
            if let Ok((ws, _)) = connect_async(url.as_str()).await {
                return ws;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(replacement.is_ok(), "freed slot was never reusable");
    eventually(|| registry.connection_count() == 2).await;
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let (url, server) = boot_default().await;
    let mut ws = connect(&url).await;
    let registry = server.registry().clone();
    eventually(|| registry.connection_count() == 1).await;

    server.shutdown().shutdown();

    let ended = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(ended.is_ok(), "session did not close on shutdown");
    eventually(|| registry.connection_count() == 0).await;
}
