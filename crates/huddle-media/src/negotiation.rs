//! Per-peer offer/answer negotiation over the media runtime.
//!
//! The engine owns the arena of peer links for one concern (voice or
//! video). Session code feeds it relay events and local intents; it
//! returns the actions the session must carry out, so the engine itself
//! never touches a signal channel.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_shared::constants::DEFAULT_STUN_URL;
use huddle_shared::protocol::{CandidateInit, IceConfig, IceServer, SessionDescription};
use huddle_shared::UserId;

use crate::error::MediaError;
use crate::link::{LinkState, LinkSummary, PeerLink};
use crate::runtime::{MediaRuntime, TrackHandle, TransportEvent, TransportState};

/// Side effects the session must carry out after feeding the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Relay this signaling payload to the peer.
    Signal { to: UserId, payload: SignalPayload },
    /// Surface (`Some`) or clear (`None`) a peer-scoped error.
    PeerError {
        peer: UserId,
        message: Option<String>,
    },
    /// A remote stream arrived and its sink is attached.
    StreamAttached { peer: UserId },
    /// The peer's link was closed and discarded.
    LinkClosed { peer: UserId },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(CandidateInit),
}

/// Connection state machine for every remote peer of one concern.
pub struct NegotiationEngine {
    local_user: UserId,
    runtime: Arc<dyn MediaRuntime>,
    ice: IceConfig,
    ice_received: bool,
    links: HashMap<UserId, PeerLink>,
    events_tx: mpsc::Sender<(UserId, TransportEvent)>,
}

impl NegotiationEngine {
    pub fn new(
        local_user: UserId,
        runtime: Arc<dyn MediaRuntime>,
        events_tx: mpsc::Sender<(UserId, TransportEvent)>,
    ) -> Self {
        Self {
            local_user,
            runtime,
            ice: IceConfig {
                ice_servers: vec![IceServer::stun(DEFAULT_STUN_URL)],
            },
            ice_received: false,
            links: HashMap::new(),
            events_tx,
        }
    }

    /// Adopt the relay-supplied ICE configuration. The first value wins
    /// for the lifetime of the session; later values are ignored.
    pub fn set_ice_config(&mut self, config: IceConfig) {
        if self.ice_received {
            debug!("ICE configuration already set, keeping first value");
            return;
        }
        info!(servers = config.ice_servers.len(), "ICE configuration received");
        self.ice = config;
        self.ice_received = true;
    }

    pub fn ice_config(&self) -> &IceConfig {
        &self.ice
    }

    /// Start (or restart) negotiation toward a peer. An existing link is
    /// renegotiated in place; a peer never has more than one link.
    pub async fn create_offer(
        &mut self,
        remote: &UserId,
        local_tracks: &[TrackHandle],
    ) -> Result<Vec<EngineAction>, MediaError> {
        let renegotiation = self.links.contains_key(remote);
        let link = self.ensure_link(remote, LinkState::Offering).await?;
        if renegotiation && link.state == LinkState::Connected {
            link.state = LinkState::Renegotiating;
        }

        link.attach_tracks(local_tracks).await?;
        let offer = link.transport.create_offer().await?;
        debug!(peer = %remote.short(), renegotiation, "Created offer");

        Ok(vec![EngineAction::Signal {
            to: remote.clone(),
            payload: SignalPayload::Offer(offer),
        }])
    }

    /// Apply an inbound offer and produce the answer.
    ///
    /// When both sides offered at once, the participant with the smaller
    /// id keeps the offerer role and the other yields and answers, so
    /// exactly one of the two competing offers survives.
    pub async fn handle_offer(
        &mut self,
        from: &UserId,
        offer: SessionDescription,
        local_tracks: &[TrackHandle],
    ) -> Result<Vec<EngineAction>, MediaError> {
        let keeps_offerer_role = self.local_user < *from;
        if let Some(link) = self.links.get_mut(from) {
            match link.state {
                LinkState::Offering if keeps_offerer_role => {
                    warn!(peer = %from.short(), "Offer glare, keeping offerer role");
                    return Ok(Vec::new());
                }
                LinkState::Offering => {
                    warn!(peer = %from.short(), "Offer glare, yielding offerer role");
                    link.state = LinkState::Answering;
                }
                LinkState::Connected | LinkState::Renegotiating => {
                    debug!(peer = %from.short(), "Inbound renegotiation offer");
                    link.state = LinkState::Renegotiating;
                }
                _ => {}
            }
        }

        let link = self.ensure_link(from, LinkState::Answering).await?;
        link.attach_tracks(local_tracks).await?;
        link.set_remote_description(offer).await?;
        let answer = link.transport.create_answer().await?;
        if link.state == LinkState::Renegotiating {
            link.state = LinkState::Connected;
        }
        debug!(peer = %from.short(), "Answering offer");

        Ok(vec![EngineAction::Signal {
            to: from.clone(),
            payload: SignalPayload::Answer(answer),
        }])
    }

    /// Apply an inbound answer. Valid only while a local offer is
    /// outstanding; anything else is logged and discarded.
    pub async fn handle_answer(
        &mut self,
        from: &UserId,
        answer: SessionDescription,
    ) -> Result<Vec<EngineAction>, MediaError> {
        let Some(link) = self.links.get_mut(from) else {
            warn!(peer = %from.short(), "Answer from unknown peer, discarding");
            return Ok(Vec::new());
        };

        match link.state {
            LinkState::Offering | LinkState::Renegotiating => {
                let renegotiation = link.state == LinkState::Renegotiating;
                link.set_remote_description(answer).await?;
                if renegotiation {
                    link.state = LinkState::Connected;
                }
                debug!(peer = %from.short(), "Applied answer");
            }
            state => {
                warn!(peer = %from.short(), state = ?state, "Answer in unexpected state, discarding");
            }
        }
        Ok(Vec::new())
    }

    /// Apply or hold an inbound candidate. Candidates for unknown peers
    /// are discarded.
    pub async fn handle_candidate(
        &mut self,
        from: &UserId,
        candidate: CandidateInit,
    ) -> Result<Vec<EngineAction>, MediaError> {
        let Some(link) = self.links.get_mut(from) else {
            warn!(peer = %from.short(), "Candidate for unknown peer, discarding");
            return Ok(Vec::new());
        };
        link.apply_or_queue(candidate).await?;
        Ok(Vec::new())
    }

    /// React to an asynchronous transport notification for one peer.
    pub async fn handle_transport_event(
        &mut self,
        peer: &UserId,
        event: TransportEvent,
    ) -> Result<Vec<EngineAction>, MediaError> {
        let Some(link) = self.links.get_mut(peer) else {
            debug!(peer = %peer.short(), "Transport event for departed peer, ignoring");
            return Ok(Vec::new());
        };

        match event {
            TransportEvent::CandidateGathered(candidate) => Ok(vec![EngineAction::Signal {
                to: peer.clone(),
                payload: SignalPayload::Candidate(candidate),
            }]),
            TransportEvent::StateChanged(TransportState::Connected) => {
                link.state = LinkState::Connected;
                info!(peer = %peer.short(), "Peer connected");
                Ok(vec![EngineAction::PeerError {
                    peer: peer.clone(),
                    message: None,
                }])
            }
            TransportEvent::StateChanged(TransportState::Failed) => {
                link.state = LinkState::Failed;
                warn!(peer = %peer.short(), "Peer connection failed");
                Ok(vec![EngineAction::PeerError {
                    peer: peer.clone(),
                    message: Some("connection failed".to_string()),
                }])
            }
            TransportEvent::StateChanged(TransportState::Disconnected) => {
                warn!(peer = %peer.short(), "Peer connection lost");
                Ok(vec![EngineAction::PeerError {
                    peer: peer.clone(),
                    message: Some("connection lost".to_string()),
                }])
            }
            TransportEvent::RemoteStream(stream) => {
                let sink = self.runtime.create_sink(peer, &stream.id);
                link.sink = Some(sink);
                info!(peer = %peer.short(), stream = %stream.id, "Remote stream attached");
                Ok(vec![EngineAction::StreamAttached { peer: peer.clone() }])
            }
        }
    }

    /// Close and discard the peer's link. Safe to call for peers that
    /// never connected.
    pub async fn remove_peer(&mut self, peer: &UserId) -> Vec<EngineAction> {
        match self.links.remove(peer) {
            Some(mut link) => {
                link.close().await;
                info!(peer = %peer.short(), "Peer link closed");
                vec![EngineAction::LinkClosed { peer: peer.clone() }]
            }
            None => Vec::new(),
        }
    }

    /// Attach a new local track to every link and renegotiate the links
    /// it was actually added to.
    pub async fn attach_track_to_all(
        &mut self,
        track: &TrackHandle,
    ) -> Result<Vec<EngineAction>, MediaError> {
        let mut actions = Vec::new();
        for link in self.links.values_mut() {
            if !link.attach_tracks(std::slice::from_ref(track)).await? {
                continue;
            }
            if link.state == LinkState::Connected {
                link.state = LinkState::Renegotiating;
            }
            let offer = link.transport.create_offer().await?;
            debug!(peer = %link.remote().short(), track = %track.id, "Renegotiating with new track");
            actions.push(EngineAction::Signal {
                to: link.remote().clone(),
                payload: SignalPayload::Offer(offer),
            });
        }
        Ok(actions)
    }

    /// Detach a local track from every link that carries it.
    pub async fn remove_track_from_all(&mut self, track_id: &str) -> Result<(), MediaError> {
        for link in self.links.values_mut() {
            let carried = link
                .transport
                .outbound_tracks()
                .iter()
                .any(|t| t.id == track_id);
            if carried {
                link.transport.remove_track(track_id).await?;
            }
        }
        Ok(())
    }

    /// Close every link. Used on session teardown.
    pub async fn close_all(&mut self) {
        let count = self.links.len();
        for (_, mut link) in self.links.drain() {
            link.close().await;
        }
        if count > 0 {
            info!(count, "All peer links closed");
        }
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn contains(&self, peer: &UserId) -> bool {
        self.links.contains_key(peer)
    }

    pub fn link_state(&self, peer: &UserId) -> Option<LinkState> {
        self.links.get(peer).map(|l| l.state)
    }

    /// Read-only projection of the arena, ordered by peer id.
    pub fn snapshot(&self) -> Vec<LinkSummary> {
        let mut summaries: Vec<LinkSummary> = self.links.values().map(PeerLink::summary).collect();
        summaries.sort_by(|a, b| a.peer.cmp(&b.peer));
        summaries
    }

    async fn ensure_link(
        &mut self,
        remote: &UserId,
        initial: LinkState,
    ) -> Result<&mut PeerLink, MediaError> {
        let Self {
            ref mut links,
            ref runtime,
            ref ice,
            ref events_tx,
            ..
        } = *self;

        let link = match links.entry(remote.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let transport = runtime.create_peer(remote, ice, events_tx.clone()).await?;
                info!(peer = %remote.short(), state = ?initial, "Opening peer link");
                entry.insert(PeerLink::new(remote.clone(), initial, transport))
            }
        };
        Ok(link)
    }
}
