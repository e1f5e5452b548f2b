//! The session task.
//!
//! One task owns both relay channels, both negotiation engines, the
//! captures, the chat log, and the speaking tracker. Everything else
//! talks to it through [`SessionCommand`]s and observes it through the
//! snapshot watch. Nothing here is shared or locked.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Interval};
use tracing::{debug, info, warn};

use huddle_media::{
    EngineAction, MediaRuntime, MediaToggle, NegotiationEngine, SignalPayload, SpeakingTracker,
    TransportEvent,
};
use huddle_shared::constants::CHANNEL_CAPACITY;
use huddle_shared::protocol::{
    AnswerOut, CandidateOut, ChatClientEvent, ChatServerEvent, OfferOut, SdpKind, SendMessage,
    SessionDescription, SharedServerEvent, SignalData, SignalOut, ToggleVideo, VideoClientEvent,
    VideoServerEvent, VoiceClientEvent, VoiceJoin, VoiceServerEvent,
};
use huddle_shared::{MeetingId, UserId};
use huddle_signal::{
    spawn_channel, ChannelConfig, ChannelEvent, ChannelState, SignalChannel, SignalSender,
};

use crate::chat::ChatLog;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::snapshot::{SessionErrors, SessionSnapshot};

/// Requests accepted by a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Stage and send a chat message. Whitespace-only text is dropped.
    SendChat(String),

    /// Flip the local camera and renegotiate affected peers.
    ToggleVideo,

    /// Mute or unmute the microphone. Local only; never renegotiates.
    SetMuted(bool),

    /// Tear the session down: captures, peer links, then both channels.
    Leave,
}

/// Join the meeting and spawn the session task.
///
/// Connects both relay channels before returning, so a bad endpoint or a
/// rejected token fails here instead of surfacing later through the
/// snapshot. The session runs until [`SessionCommand::Leave`] or until
/// every command sender is dropped.
pub async fn spawn_session(
    config: SessionConfig,
    runtime: Arc<dyn MediaRuntime>,
) -> Result<(mpsc::Sender<SessionCommand>, watch::Receiver<SessionSnapshot>), SessionError> {
    let relay_config = ChannelConfig {
        endpoint: config.relay_endpoint.clone(),
        room: config.meeting_id.clone(),
        auth_token: config.auth_token.clone(),
        reconnect: config.reconnect.clone(),
    };
    let chat_join = ChatClientEvent::JoinMeeting(config.meeting_id.clone());
    let (relay, relay_events) =
        spawn_channel::<SharedServerEvent, _>(relay_config, &chat_join).await?;

    let voice_config = ChannelConfig {
        endpoint: config.voice_endpoint.clone(),
        room: config.meeting_id.clone(),
        auth_token: config.auth_token.clone(),
        reconnect: config.reconnect.clone(),
    };
    let voice_join = VoiceClientEvent::JoinMeeting(VoiceJoin {
        meeting_id: config.meeting_id.clone(),
        user_id: config.local_user.clone(),
    });
    let (voice_relay, voice_events) =
        match spawn_channel::<VoiceServerEvent, _>(voice_config, &voice_join).await {
            Ok(pair) => pair,
            Err(error) => {
                relay.close().await;
                return Err(error.into());
            }
        };

    info!(
        room = %config.meeting_id,
        user = %config.local_user.short(),
        "Session channels connected"
    );

    let (video_events_tx, video_transport_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (voice_events_tx, voice_transport_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let mut video_engine = NegotiationEngine::new(
        config.local_user.clone(),
        Arc::clone(&runtime),
        video_events_tx,
    );
    // A configured override counts as the first ICE value, so the
    // relay's ice-config is ignored for the rest of the session.
    if let Some(ice) = config.ice_override.clone() {
        video_engine.set_ice_config(ice);
    }
    let voice_engine = NegotiationEngine::new(
        config.local_user.clone(),
        Arc::clone(&runtime),
        voice_events_tx,
    );

    let mut toggle = MediaToggle::new(Arc::clone(&runtime), config.capture.clone());
    let mut tracker = SpeakingTracker::new();
    let mut errors = SessionErrors::default();
    match toggle.start_microphone().await {
        Ok(Some(probe)) => tracker.attach(config.local_user.clone(), probe),
        Ok(None) => {}
        Err(error) => {
            warn!(error = %error, "Microphone unavailable");
            errors.capture = Some(error.to_string());
        }
    }

    let chat = ChatLog::new(config.local_user.clone(), config.display_name.clone());
    let initial = SessionSnapshot {
        relay: relay.state(),
        voice_relay: voice_relay.state(),
        errors: errors.clone(),
        muted: toggle.is_muted(),
        ..SessionSnapshot::default()
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let video_tx = relay.share();
    let task = SessionTask {
        local_user: config.local_user,
        meeting_id: config.meeting_id,
        relay,
        video_tx,
        voice_relay,
        relay_events,
        voice_events,
        video_engine,
        voice_engine,
        video_transport_rx,
        voice_transport_rx,
        toggle,
        tracker,
        chat,
        peer_video: HashMap::new(),
        errors,
        snapshot_tx,
        cmd_rx,
        vad_ticks: interval(config.vad_interval),
    };
    tokio::spawn(task.run());

    Ok((cmd_tx, snapshot_rx))
}

struct SessionTask {
    local_user: UserId,
    meeting_id: MeetingId,
    /// Owns the chat+video relay connection.
    relay: SignalChannel,
    /// Shared handle on the same connection, used for video sends.
    video_tx: SignalSender,
    voice_relay: SignalChannel,
    relay_events: mpsc::Receiver<ChannelEvent<SharedServerEvent>>,
    voice_events: mpsc::Receiver<ChannelEvent<VoiceServerEvent>>,
    video_engine: NegotiationEngine,
    voice_engine: NegotiationEngine,
    video_transport_rx: mpsc::Receiver<(UserId, TransportEvent)>,
    voice_transport_rx: mpsc::Receiver<(UserId, TransportEvent)>,
    toggle: MediaToggle,
    tracker: SpeakingTracker,
    chat: ChatLog,
    peer_video: HashMap<UserId, bool>,
    errors: SessionErrors,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    vad_ticks: Interval,
}

impl SessionTask {
    async fn run(mut self) {
        info!(room = %self.meeting_id, "Session task started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break;
                        }
                    }
                    // Every command sender is gone, nobody can leave
                    // explicitly anymore.
                    None => break,
                },
                Some(event) = self.relay_events.recv() => {
                    self.handle_relay_event(event).await;
                }
                Some(event) = self.voice_events.recv() => {
                    self.handle_voice_event(event).await;
                }
                Some((peer, event)) = self.video_transport_rx.recv() => {
                    self.handle_video_transport(peer, event).await;
                }
                Some((peer, event)) = self.voice_transport_rx.recv() => {
                    self.handle_voice_transport(peer, event).await;
                }
                _ = self.vad_ticks.tick() => {
                    self.tracker.tick();
                }
            }
            self.publish();
        }
        self.teardown().await;
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Returns `true` when the session should tear down.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::SendChat(text) => {
                let Some(trimmed) = self.chat.stage_outgoing(&text) else {
                    return false;
                };
                let payload = ChatClientEvent::SendMessage(SendMessage {
                    meeting_id: self.meeting_id.clone(),
                    text: trimmed,
                });
                if let Err(error) = self.relay.send(&payload).await {
                    warn!(error = %error, "Chat message not sent");
                    self.errors.transient = Some(format!("chat message not sent: {error}"));
                }
                false
            }
            SessionCommand::ToggleVideo => {
                self.toggle_video().await;
                false
            }
            SessionCommand::SetMuted(muted) => {
                self.toggle.set_muted(muted);
                false
            }
            SessionCommand::Leave => true,
        }
    }

    async fn toggle_video(&mut self) {
        match self.toggle.toggle_video(&mut self.video_engine).await {
            Ok(outcome) => {
                self.errors.capture = None;
                self.dispatch_video_actions(outcome.actions).await;
                let payload = VideoClientEvent::ToggleVideo(ToggleVideo {
                    room_id: self.meeting_id.clone(),
                    enabled: outcome.enabled,
                });
                if let Err(error) = self.video_tx.send(&payload).await {
                    warn!(error = %error, "Video toggle not announced");
                }
            }
            Err(error) => {
                warn!(error = %error, "Video toggle failed");
                self.errors.capture = Some(error.to_string());
            }
        }
    }

    // ------------------------------------------------------------------
    // Chat + video relay
    // ------------------------------------------------------------------

    async fn handle_relay_event(&mut self, event: ChannelEvent<SharedServerEvent>) {
        match event {
            ChannelEvent::Ready => {
                self.errors.transient = None;
                // The video room join rides the same connection and must
                // follow every (re)connect; the chat join is re-sent by
                // the channel itself.
                let join = VideoClientEvent::JoinVideoRoom(self.meeting_id.clone());
                if let Err(error) = self.video_tx.send(&join).await {
                    warn!(error = %error, "Video room join not sent");
                }
            }
            ChannelEvent::Reconnecting { attempt } => {
                self.errors.transient = Some(format!("reconnecting to relay (attempt {attempt})"));
            }
            ChannelEvent::Fatal { reason } => {
                self.errors.transient = None;
                self.errors.fatal = Some(reason);
            }
            ChannelEvent::Event(SharedServerEvent::Chat(event)) => self.handle_chat_event(event),
            ChannelEvent::Event(SharedServerEvent::Video(event)) => {
                self.handle_video_event(event).await;
            }
        }
    }

    fn handle_chat_event(&mut self, event: ChatServerEvent) {
        match event {
            ChatServerEvent::ChatHistory(history) => self.chat.apply_history(history),
            ChatServerEvent::NewMessage(message) => self.chat.apply_incoming(message),
            ChatServerEvent::UserJoined(presence) => self.chat.user_joined(&presence.user_name),
            ChatServerEvent::UserLeft(presence) => self.chat.user_left(&presence.user_name),
            ChatServerEvent::MeetingEnded(ended) => {
                info!(meeting = %ended.meeting_id, "Meeting ended by host");
                self.chat.meeting_ended();
            }
        }
    }

    async fn handle_video_event(&mut self, event: VideoServerEvent) {
        match event {
            VideoServerEvent::IceConfig(config) => self.video_engine.set_ice_config(config),
            VideoServerEvent::ExistingUsers(existing) => {
                // We are the newcomer: offer to every incumbent.
                let tracks = self.toggle.local_video_tracks();
                for user in existing.users {
                    if user == self.local_user {
                        continue;
                    }
                    match self.video_engine.create_offer(&user, &tracks).await {
                        Ok(actions) => self.dispatch_video_actions(actions).await,
                        Err(error) => {
                            warn!(peer = %user.short(), error = %error, "Video offer failed");
                            self.errors.peer.insert(user, error.to_string());
                        }
                    }
                }
            }
            VideoServerEvent::UserJoined(joined) => {
                // The newcomer offers to us; nothing to initiate here.
                debug!(peer = %joined.user_id.short(), "Peer joined video room");
            }
            VideoServerEvent::VideoOffer(inbound) => {
                let tracks = self.toggle.local_video_tracks();
                match self
                    .video_engine
                    .handle_offer(&inbound.from, inbound.offer, &tracks)
                    .await
                {
                    Ok(actions) => self.dispatch_video_actions(actions).await,
                    Err(error) => {
                        warn!(peer = %inbound.from.short(), error = %error, "Video offer rejected");
                        self.errors.peer.insert(inbound.from, error.to_string());
                    }
                }
            }
            VideoServerEvent::VideoAnswer(inbound) => {
                match self
                    .video_engine
                    .handle_answer(&inbound.from, inbound.answer)
                    .await
                {
                    Ok(actions) => self.dispatch_video_actions(actions).await,
                    Err(error) => {
                        warn!(peer = %inbound.from.short(), error = %error, "Video answer rejected");
                        self.errors.peer.insert(inbound.from, error.to_string());
                    }
                }
            }
            VideoServerEvent::IceCandidate(inbound) => {
                match self
                    .video_engine
                    .handle_candidate(&inbound.from, inbound.candidate)
                    .await
                {
                    Ok(actions) => self.dispatch_video_actions(actions).await,
                    Err(error) => {
                        warn!(peer = %inbound.from.short(), error = %error, "Video candidate rejected");
                        self.errors.peer.insert(inbound.from, error.to_string());
                    }
                }
            }
            VideoServerEvent::PeerToggleVideo(toggled) => {
                debug!(peer = %toggled.peer_id.short(), enabled = toggled.enabled, "Peer video toggled");
                self.peer_video.insert(toggled.peer_id, toggled.enabled);
            }
            VideoServerEvent::PeerDisconnected(disconnected) => {
                let actions = self.video_engine.remove_peer(&disconnected.peer_id).await;
                self.peer_video.remove(&disconnected.peer_id);
                self.dispatch_video_actions(actions).await;
            }
            VideoServerEvent::RoomFull => {
                warn!(room = %self.meeting_id, "Video room is full");
                self.errors.room_full = true;
            }
        }
    }

    async fn dispatch_video_actions(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Signal { to, payload } => {
                    let event = match payload {
                        SignalPayload::Offer(offer) => VideoClientEvent::VideoOffer(OfferOut {
                            offer,
                            room_id: self.meeting_id.clone(),
                            to,
                        }),
                        SignalPayload::Answer(answer) => VideoClientEvent::VideoAnswer(AnswerOut {
                            answer,
                            room_id: self.meeting_id.clone(),
                            to,
                        }),
                        SignalPayload::Candidate(candidate) => {
                            VideoClientEvent::IceCandidate(CandidateOut {
                                candidate,
                                room_id: self.meeting_id.clone(),
                                to,
                            })
                        }
                    };
                    if let Err(error) = self.video_tx.send(&event).await {
                        warn!(error = %error, "Video signal dropped");
                    }
                }
                EngineAction::PeerError { peer, message } => self.note_peer_error(peer, message),
                EngineAction::StreamAttached { peer } => {
                    debug!(peer = %peer.short(), "Video stream attached");
                }
                EngineAction::LinkClosed { peer } => {
                    self.errors.peer.remove(&peer);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Voice relay
    // ------------------------------------------------------------------

    async fn handle_voice_event(&mut self, event: ChannelEvent<VoiceServerEvent>) {
        match event {
            ChannelEvent::Ready | ChannelEvent::Reconnecting { .. } => {
                // Connection state is projected into the snapshot; the
                // chat+video relay owns the transient error slot.
            }
            ChannelEvent::Fatal { reason } => {
                self.errors.fatal = Some(reason);
            }
            ChannelEvent::Event(VoiceServerEvent::UserConnected(user)) => {
                // We are the incumbent: the voice room announces joiners
                // instead of sending them a roster, so we offer first.
                let tracks = self.toggle.local_audio_tracks();
                match self.voice_engine.create_offer(&user, &tracks).await {
                    Ok(actions) => self.dispatch_voice_actions(actions).await,
                    Err(error) => {
                        warn!(peer = %user.short(), error = %error, "Voice offer failed");
                        self.errors.peer.insert(user, error.to_string());
                    }
                }
            }
            ChannelEvent::Event(VoiceServerEvent::Signal(signal)) => {
                self.handle_voice_signal(signal.from, signal.signal_data).await;
            }
            ChannelEvent::Event(VoiceServerEvent::UserDisconnected(user)) => {
                let actions = self.voice_engine.remove_peer(&user).await;
                self.dispatch_voice_actions(actions).await;
            }
        }
    }

    async fn handle_voice_signal(&mut self, from: UserId, data: SignalData) {
        let result = match data {
            SignalData::Offer { sdp } => {
                let offer = SessionDescription {
                    kind: SdpKind::Offer,
                    sdp,
                };
                let tracks = self.toggle.local_audio_tracks();
                self.voice_engine.handle_offer(&from, offer, &tracks).await
            }
            SignalData::Answer { sdp } => {
                let answer = SessionDescription {
                    kind: SdpKind::Answer,
                    sdp,
                };
                self.voice_engine.handle_answer(&from, answer).await
            }
            SignalData::Candidate { candidate } => {
                self.voice_engine.handle_candidate(&from, candidate).await
            }
        };
        match result {
            Ok(actions) => self.dispatch_voice_actions(actions).await,
            Err(error) => {
                warn!(peer = %from.short(), error = %error, "Voice signal rejected");
                self.errors.peer.insert(from, error.to_string());
            }
        }
    }

    async fn dispatch_voice_actions(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Signal { to, payload } => {
                    let signal_data = match payload {
                        SignalPayload::Offer(desc) | SignalPayload::Answer(desc) => {
                            SignalData::from_description(desc)
                        }
                        SignalPayload::Candidate(candidate) => SignalData::Candidate { candidate },
                    };
                    let event = VoiceClientEvent::Signal(SignalOut {
                        to,
                        from: self.local_user.clone(),
                        signal_data,
                    });
                    if let Err(error) = self.voice_relay.send(&event).await {
                        warn!(error = %error, "Voice signal dropped");
                    }
                }
                EngineAction::PeerError { peer, message } => self.note_peer_error(peer, message),
                EngineAction::StreamAttached { peer } => {
                    debug!(peer = %peer.short(), "Voice stream attached");
                }
                EngineAction::LinkClosed { peer } => {
                    self.tracker.detach(&peer);
                    self.errors.peer.remove(&peer);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    async fn handle_video_transport(&mut self, peer: UserId, event: TransportEvent) {
        match self.video_engine.handle_transport_event(&peer, event).await {
            Ok(actions) => self.dispatch_video_actions(actions).await,
            Err(error) => {
                warn!(peer = %peer.short(), error = %error, "Video transport event failed");
                self.errors.peer.insert(peer, error.to_string());
            }
        }
    }

    async fn handle_voice_transport(&mut self, peer: UserId, event: TransportEvent) {
        // Voice streams feed the speaking tracker; the probe is taken
        // here so the engine only ever sees the stream itself.
        let event = match event {
            TransportEvent::RemoteStream(mut stream) => {
                if let Some(probe) = stream.audio.take() {
                    self.tracker.attach(peer.clone(), probe);
                }
                TransportEvent::RemoteStream(stream)
            }
            other => other,
        };
        match self.voice_engine.handle_transport_event(&peer, event).await {
            Ok(actions) => self.dispatch_voice_actions(actions).await,
            Err(error) => {
                warn!(peer = %peer.short(), error = %error, "Voice transport event failed");
                self.errors.peer.insert(peer, error.to_string());
            }
        }
    }

    // ------------------------------------------------------------------
    // Projection + teardown
    // ------------------------------------------------------------------

    fn note_peer_error(&mut self, peer: UserId, message: Option<String>) {
        match message {
            Some(message) => {
                self.errors.peer.insert(peer, message);
            }
            None => {
                self.errors.peer.remove(&peer);
            }
        }
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            relay: self.relay.state(),
            voice_relay: self.voice_relay.state(),
            chat: self.chat.entries().to_vec(),
            video_links: self.video_engine.snapshot(),
            voice_links: self.voice_engine.snapshot(),
            speaking: self.tracker.speaking().clone(),
            peer_video: self.peer_video.clone(),
            video_enabled: self.toggle.video_on(),
            muted: self.toggle.is_muted(),
            errors: self.errors.clone(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn teardown(mut self) {
        info!(room = %self.meeting_id, "Leaving session");
        self.toggle.release();
        self.video_engine.close_all().await;
        self.voice_engine.close_all().await;

        let final_snapshot = SessionSnapshot {
            relay: ChannelState::Closed,
            voice_relay: ChannelState::Closed,
            chat: self.chat.entries().to_vec(),
            muted: self.toggle.is_muted(),
            errors: self.errors.clone(),
            ..SessionSnapshot::default()
        };

        self.relay.close().await;
        self.voice_relay.close().await;
        let _ = self.snapshot_tx.send(final_snapshot);
    }
}
