mod support;

use futures::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use huddle_shared::protocol::{ChatClientEvent, ChatServerEvent, SendMessage};
use huddle_shared::MeetingId;
use huddle_signal::{spawn_channel, ChannelError, ChannelEvent, ChannelState};

use support::*;

fn join_event() -> ChatClientEvent {
    ChatClientEvent::JoinMeeting(MeetingId::new("m-1"))
}

fn reject_unauthorized(_req: &Request, _res: Response) -> Result<Response, ErrorResponse> {
    let mut resp = ErrorResponse::new(Some("unauthorized".to_string()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    Err(resp)
}

#[tokio::test]
async fn test_connect_joins_and_delivers_events() {
    init_tracing();
    let (listener, url) = bind_relay().await;
    let config = test_config(&url);

    let client = tokio::spawn(async move {
        spawn_channel::<ChatServerEvent, _>(config, &join_event()).await
    });
    let mut server = accept_peer(&listener).await;
    let (channel, mut events) = client.await.unwrap().unwrap();

    // The join handshake is the first thing on the wire.
    let join = recv_json(&mut server).await;
    assert_eq!(join["event"], "join-meeting");
    assert_eq!(join["data"], "m-1");

    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));
    assert_eq!(channel.state(), ChannelState::Ready);

    send_json(&mut server, json!({"event": "chat-history", "data": []})).await;
    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Event(ChatServerEvent::ChatHistory(vec![])))
    );

    channel.close().await;
}

#[tokio::test]
async fn test_bearer_token_sent_on_upgrade() {
    init_tracing();
    let (listener, url) = bind_relay().await;
    let (auth_tx, auth_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |req: &Request, res: Response| {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let _ = auth_tx.send(auth);
                Ok(res)
            },
        )
        .await
        .unwrap();
        // Hold the connection open until the client closes it.
        while let Some(Ok(_)) = ws.next().await {}
    });

    let (channel, mut events) =
        spawn_channel::<ChatServerEvent, _>(test_config(&url), &join_event())
            .await
            .unwrap();

    assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer tok-1"));
    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));

    channel.close().await;
}

#[tokio::test]
async fn test_reconnect_rejoins_and_restores_send() {
    init_tracing();
    let (listener, url) = bind_relay().await;
    let config = test_config(&url);

    let client = tokio::spawn(async move {
        spawn_channel::<ChatServerEvent, _>(config, &join_event()).await
    });
    let mut server = accept_peer(&listener).await;
    let (channel, mut events) = client.await.unwrap().unwrap();

    recv_json(&mut server).await;
    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));

    // Kill the transport without a close handshake.
    drop(server);
    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Reconnecting { attempt: 1 })
    );

    // The relay comes back; the channel must rejoin on its own.
    let mut server = accept_peer(&listener).await;
    let rejoin = recv_json(&mut server).await;
    assert_eq!(rejoin["event"], "join-meeting");

    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));
    assert_eq!(channel.state(), ChannelState::Ready);

    // Error state is cleared: sending works again.
    channel
        .send(&ChatClientEvent::SendMessage(SendMessage {
            meeting_id: MeetingId::new("m-1"),
            text: "back".to_string(),
        }))
        .await
        .unwrap();
    let sent = recv_json(&mut server).await;
    assert_eq!(sent["event"], "send-message");
    assert_eq!(sent["data"]["text"], "back");

    channel.close().await;
}

#[tokio::test]
async fn test_reconnect_budget_exhaustion_is_fatal() {
    init_tracing();
    let (listener, url) = bind_relay().await;
    let config = test_config(&url);

    let client = tokio::spawn(async move {
        spawn_channel::<ChatServerEvent, _>(config, &join_event()).await
    });
    let server = accept_peer(&listener).await;
    let (channel, mut events) = client.await.unwrap().unwrap();
    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));

    // Take the relay away entirely so every attempt is refused.
    drop(listener);
    drop(server);

    for attempt in 1..=3 {
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Reconnecting { attempt })
        );
    }
    match events.recv().await {
        Some(ChannelEvent::Fatal { reason }) => assert!(reason.contains("budget")),
        other => panic!("expected fatal after three attempts, got {other:?}"),
    }

    // Terminal: the task is gone and sending stays refused.
    assert_eq!(events.recv().await, None);
    assert_eq!(channel.state(), ChannelState::Fatal);
    let err = channel.send(&join_event()).await.unwrap_err();
    assert!(matches!(err, ChannelError::NotConnected));
}

#[tokio::test]
async fn test_auth_rejection_fails_fast() {
    init_tracing();
    let (listener, url) = bind_relay().await;

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = tokio_tungstenite::accept_hdr_async(stream, reject_unauthorized).await;
        }
    });

    let err = spawn_channel::<ChatServerEvent, _>(test_config(&url), &join_event())
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::AuthRejected));
}

#[tokio::test]
async fn test_auth_rejection_during_reconnect_is_fatal() {
    init_tracing();
    let (listener, url) = bind_relay().await;
    let config = test_config(&url);

    let client = tokio::spawn(async move {
        spawn_channel::<ChatServerEvent, _>(config, &join_event()).await
    });
    let server = accept_peer(&listener).await;
    let (_channel, mut events) = client.await.unwrap().unwrap();
    assert_eq!(events.recv().await, Some(ChannelEvent::Ready));

    // From now on the relay refuses the token.
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = tokio_tungstenite::accept_hdr_async(stream, reject_unauthorized).await;
        }
    });
    drop(server);

    assert_eq!(
        events.recv().await,
        Some(ChannelEvent::Reconnecting { attempt: 1 })
    );
    // No second attempt: rejection is terminal.
    match events.recv().await {
        Some(ChannelEvent::Fatal { reason }) => assert!(reason.contains("auth")),
        other => panic!("expected fatal on rejected auth, got {other:?}"),
    }
    assert_eq!(events.recv().await, None);
}
