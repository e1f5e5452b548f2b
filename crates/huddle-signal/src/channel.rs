//! Relay channel orchestration with tokio mpsc command/event pattern.
//!
//! Each channel owns one WebSocket connection in a dedicated tokio task.
//! External code talks to it through a sending handle and a single typed
//! event receiver, keeping transport concerns out of session logic.

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use huddle_shared::constants::CHANNEL_CAPACITY;
use huddle_shared::MeetingId;

use crate::error::ChannelError;
use crate::reconnect::ReconnectPolicy;
use crate::state::ChannelState;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / event types
// ---------------------------------------------------------------------------

/// Commands sent *into* the channel task.
#[derive(Debug)]
enum Command {
    /// Emit a pre-encoded event to the relay.
    Send(String),
    /// Close the connection and end the task.
    Close,
}

/// Events sent *from* the channel task to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<In> {
    /// The channel is connected and the room join has been sent.
    ///
    /// Emitted again after every successful reconnect; receiving it clears
    /// any channel-scoped error the session is surfacing.
    Ready,

    /// Transport lost; reconnect attempt `attempt` of the budget is
    /// pending. Sending is disabled until `Ready` arrives again.
    Reconnecting { attempt: u32 },

    /// The channel gave up: auth was rejected or the reconnect budget ran
    /// out. The connection is closed and no further events follow.
    Fatal { reason: String },

    /// A decoded relay event.
    Event(In),
}

/// Configuration for spawning a channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Relay endpoint URL for this concern (`ws://` or `wss://`).
    pub endpoint: String,
    /// Room this channel belongs to, for logging.
    pub room: MeetingId,
    /// Bearer token; `None` connects as an anonymous participant.
    pub auth_token: Option<String>,
    /// Backoff schedule applied after transport loss.
    pub reconnect: ReconnectPolicy,
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Owning handle to a spawned channel.
///
/// Dropping it (or calling [`close`](Self::close)) shuts the connection
/// down. Handles from [`share`](Self::share) can send on the same
/// connection but cannot close it.
#[derive(Debug)]
pub struct SignalChannel {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ChannelState>,
}

/// Sending handle for a concern that borrows the connection.
#[derive(Debug, Clone)]
pub struct SignalSender {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ChannelState>,
}

impl SignalChannel {
    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Emit an event to the relay. Fails without side effects when the
    /// channel is not currently connected.
    pub async fn send(&self, event: &impl Serialize) -> Result<(), ChannelError> {
        send_on(&self.cmd_tx, &self.state_rx, event).await
    }

    /// Hand the connection to another concern. The returned sender shares
    /// the transport but the obligation to close stays here.
    pub fn share(&self) -> SignalSender {
        SignalSender {
            cmd_tx: self.cmd_tx.clone(),
            state_rx: self.state_rx.clone(),
        }
    }

    /// Close the connection and end the channel task.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(Command::Close).await;
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        // Shared senders may still hold the command channel open, so the
        // owner going away must close explicitly rather than rely on all
        // senders dropping.
        let _ = self.cmd_tx.try_send(Command::Close);
    }
}

impl SignalSender {
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// Emit an event to the relay. Fails without side effects when the
    /// channel is not currently connected.
    pub async fn send(&self, event: &impl Serialize) -> Result<(), ChannelError> {
        send_on(&self.cmd_tx, &self.state_rx, event).await
    }
}

async fn send_on(
    cmd_tx: &mpsc::Sender<Command>,
    state_rx: &watch::Receiver<ChannelState>,
    event: &impl Serialize,
) -> Result<(), ChannelError> {
    if !state_rx.borrow().is_ready() {
        return Err(ChannelError::NotConnected);
    }
    let text = serde_json::to_string(event)?;
    cmd_tx
        .send(Command::Send(text))
        .await
        .map_err(|_| ChannelError::Closed)
}

// ---------------------------------------------------------------------------
// Spawning and the event loop
// ---------------------------------------------------------------------------

/// Connect to the relay and spawn the channel task.
///
/// Sends `join` right after the connection is established and again after
/// every successful reconnect; the relay tolerates the duplicate join.
/// Returns the owning handle plus the inbound event stream.
///
/// Fails fast when the relay rejects the auth token or the endpoint is
/// unreachable; the reconnect budget only covers loss of an established
/// connection.
pub async fn spawn_channel<In, J>(
    config: ChannelConfig,
    join: &J,
) -> Result<(SignalChannel, mpsc::Receiver<ChannelEvent<In>>), ChannelError>
where
    In: DeserializeOwned + Send + 'static,
    J: Serialize + ?Sized,
{
    let join_text = serde_json::to_string(join)?;
    let ws = open_socket(&config).await?;

    info!(endpoint = %config.endpoint, room = %config.room, "Channel connected");

    let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(CHANNEL_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel::<ChannelEvent<In>>(CHANNEL_CAPACITY);

    tokio::spawn(run_channel(config, join_text, ws, cmd_rx, event_tx, state_tx));

    Ok((SignalChannel { cmd_tx, state_rx }, event_rx))
}

async fn run_channel<In>(
    config: ChannelConfig,
    join_text: String,
    mut ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<ChannelEvent<In>>,
    state_tx: watch::Sender<ChannelState>,
) where
    In: DeserializeOwned,
{
    // Join handshake for the initial connection.
    if ws.send(Message::Text(join_text.clone())).await.is_ok() {
        let _ = state_tx.send(ChannelState::Ready);
        if event_tx.send(ChannelEvent::Ready).await.is_err() {
            let _ = ws.close(None).await;
            return;
        }
    } else {
        match reestablish(&config, &join_text, &event_tx, &state_tx).await {
            Some(socket) => ws = socket,
            None => return,
        }
    }

    loop {
        tokio::select! {
            // --- Outbound commands ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send(text)) => {
                        if let Err(e) = ws.send(Message::Text(text)).await {
                            warn!(room = %config.room, error = %e, "Send failed, transport lost");
                            match reestablish(&config, &join_text, &event_tx, &state_tx).await {
                                Some(socket) => ws = socket,
                                None => return,
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        debug!(room = %config.room, "Channel closed by owner");
                        let _ = state_tx.send(ChannelState::Closed);
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }

            // --- Inbound frames ---
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<In>(&text) {
                            Ok(event) => {
                                if event_tx.send(ChannelEvent::Event(event)).await.is_err() {
                                    // Receiver gone; nobody is listening anymore.
                                    let _ = ws.close(None).await;
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(room = %config.room, error = %e, "Ignoring undecodable event");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        match reestablish(&config, &join_text, &event_tx, &state_tx).await {
                            Some(socket) => ws = socket,
                            None => return,
                        }
                    }
                }
            }
        }
    }
}

/// Walk the backoff schedule until a connection and rejoin succeed or the
/// budget runs out. `None` means the channel is finished and the fatal
/// state has been published.
async fn reestablish<In>(
    config: &ChannelConfig,
    join_text: &str,
    event_tx: &mpsc::Sender<ChannelEvent<In>>,
    state_tx: &watch::Sender<ChannelState>,
) -> Option<WsStream> {
    let policy = &config.reconnect;
    let mut attempt = 1;

    while policy.allows(attempt) {
        let _ = state_tx.send(ChannelState::Reconnecting { attempt });
        if event_tx
            .send(ChannelEvent::Reconnecting { attempt })
            .await
            .is_err()
        {
            return None;
        }

        tokio::time::sleep(policy.delay_for(attempt)).await;

        match open_socket(config).await {
            Ok(mut ws) => {
                if ws.send(Message::Text(join_text.to_string())).await.is_err() {
                    warn!(room = %config.room, attempt, "Rejoin failed after reconnect");
                    attempt += 1;
                    continue;
                }
                info!(room = %config.room, attempt, "Channel reconnected");
                let _ = state_tx.send(ChannelState::Ready);
                if event_tx.send(ChannelEvent::Ready).await.is_err() {
                    let _ = ws.close(None).await;
                    return None;
                }
                return Some(ws);
            }
            Err(e) if e.is_fatal() => {
                return fatal(event_tx, state_tx, &e.to_string()).await;
            }
            Err(e) => {
                warn!(room = %config.room, attempt, error = %e, "Reconnect attempt failed");
                attempt += 1;
            }
        }
    }

    fatal(event_tx, state_tx, "reconnect budget exhausted").await
}

async fn fatal<In>(
    event_tx: &mpsc::Sender<ChannelEvent<In>>,
    state_tx: &watch::Sender<ChannelState>,
    reason: &str,
) -> Option<WsStream> {
    warn!(reason, "Channel failed");
    let _ = state_tx.send(ChannelState::Fatal);
    let _ = event_tx
        .send(ChannelEvent::Fatal {
            reason: reason.to_string(),
        })
        .await;
    None
}

async fn open_socket(config: &ChannelConfig) -> Result<WsStream, ChannelError> {
    let mut request = config.endpoint.as_str().into_client_request()?;

    if let Some(token) = &config.auth_token {
        let value = format!("Bearer {token}")
            .parse::<HeaderValue>()
            .map_err(|_| ChannelError::InvalidToken)?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    match connect_async(request).await {
        Ok((ws, _response)) => Ok(ws),
        Err(tungstenite::Error::Http(response))
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            Err(ChannelError::AuthRejected)
        }
        Err(e) => Err(ChannelError::Transport(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_in_state(
        state: ChannelState,
    ) -> (
        SignalChannel,
        mpsc::Receiver<Command>,
        watch::Sender<ChannelState>,
    ) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let (state_tx, state_rx) = watch::channel(state);
        (SignalChannel { cmd_tx, state_rx }, cmd_rx, state_tx)
    }

    #[tokio::test]
    async fn test_send_requires_ready() {
        let (channel, _cmd_rx, _state_tx) =
            handle_in_state(ChannelState::Reconnecting { attempt: 1 });
        let err = channel.send(&"ping").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn test_shared_sender_sends_on_same_connection() {
        let (channel, mut cmd_rx, _state_tx) = handle_in_state(ChannelState::Ready);
        let shared = channel.share();
        assert_eq!(shared.state(), ChannelState::Ready);

        shared.send(&"ping").await.unwrap();
        match cmd_rx.recv().await {
            Some(Command::Send(text)) => assert_eq!(text, "\"ping\""),
            other => panic!("expected send command, got {other:?}"),
        }
    }
}
