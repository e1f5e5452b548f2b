//! Scripted relay endpoints and snapshot helpers for session tests.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tracing_subscriber::EnvFilter;

use huddle_session::{SessionConfig, SessionSnapshot};
use huddle_shared::{MeetingId, UserId};
use huddle_signal::ReconnectPolicy;

pub type ServerWs = WebSocketStream<TcpStream>;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Bind a relay endpoint on an ephemeral port.
pub async fn bind_relay() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

pub async fn accept_peer(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// Next text frame as JSON. Skips control frames.
pub async fn recv_json(ws: &mut ServerWs) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await.expect("connection closed").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    })
    .await
    .expect("no frame within timeout")
}

pub async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Wait until the snapshot satisfies `predicate`, returning that
/// snapshot.
pub async fn wait_snapshot(
    rx: &mut watch::Receiver<SessionSnapshot>,
    mut predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = rx.borrow_and_update().clone();
            if predicate(&current) {
                return current;
            }
            rx.changed().await.expect("session task ended");
        }
    })
    .await
    .expect("snapshot condition not reached")
}

/// Poll until `predicate` holds, for state the snapshot does not carry
/// (mock runtime records trail the relay pipeline).
pub async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached")
}

pub fn test_config(relay_url: &str, voice_url: &str) -> SessionConfig {
    SessionConfig {
        meeting_id: MeetingId::new("m-1"),
        local_user: UserId::new("alice"),
        display_name: "Alice".to_string(),
        auth_token: Some("tok-1".to_string()),
        relay_endpoint: relay_url.to_string(),
        voice_endpoint: voice_url.to_string(),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        vad_interval: Duration::from_millis(25),
        ..SessionConfig::default()
    }
}
