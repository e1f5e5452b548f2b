//! Scripted relay helpers for channel integration tests.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use huddle_shared::MeetingId;
use huddle_signal::{ChannelConfig, ReconnectPolicy};

pub type ServerWs = WebSocketStream<TcpStream>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Bind a relay endpoint on an ephemeral port.
pub async fn bind_relay() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept the next client and complete the WebSocket handshake.
pub async fn accept_peer(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Read frames until the next text frame, decoded as JSON.
pub async fn recv_json(ws: &mut ServerWs) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended while waiting for a frame: {other:?}"),
        }
    }
}

pub async fn send_json(ws: &mut ServerWs, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Channel config pointing at the scripted relay, with a short backoff so
/// reconnect tests run quickly.
pub fn test_config(url: &str) -> ChannelConfig {
    ChannelConfig {
        endpoint: url.to_string(),
        room: MeetingId::new("m-1"),
        auth_token: Some("tok-1".to_string()),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
    }
}
