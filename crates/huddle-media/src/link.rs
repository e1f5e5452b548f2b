use std::collections::VecDeque;

use tracing::debug;

use huddle_shared::protocol::{CandidateInit, SessionDescription};
use huddle_shared::UserId;

use crate::error::MediaError;
use crate::runtime::{MediaSink, PeerTransport, TrackHandle};

/// Negotiation state of one peer link. Absence of a link is the implicit
/// initial state; removal from the arena is the terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// We sent an offer and are waiting for the answer.
    Offering,
    /// We received an offer and have answered.
    Answering,
    /// The transport reported an established connection.
    Connected,
    /// A new offer is in flight on an already-connected link.
    Renegotiating,
    /// The transport failed; the link stays visible until the peer
    /// departs or the session ends.
    Failed,
}

/// Observable summary of one link, for state projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub peer: UserId,
    pub state: LinkState,
    pub outbound_tracks: Vec<TrackHandle>,
    pub has_sink: bool,
}

/// One remote participant's connection: the transport, the candidates
/// that arrived too early, and the rendering sink once media flows.
pub struct PeerLink {
    pub(crate) remote: UserId,
    pub(crate) state: LinkState,
    pub(crate) transport: Box<dyn PeerTransport>,
    pub(crate) pending_candidates: VecDeque<CandidateInit>,
    pub(crate) sink: Option<Box<dyn MediaSink>>,
}

impl PeerLink {
    pub(crate) fn new(remote: UserId, state: LinkState, transport: Box<dyn PeerTransport>) -> Self {
        Self {
            remote,
            state,
            transport,
            pending_candidates: VecDeque::new(),
            sink: None,
        }
    }

    pub fn remote(&self) -> &UserId {
        &self.remote
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn summary(&self) -> LinkSummary {
        LinkSummary {
            peer: self.remote.clone(),
            state: self.state,
            outbound_tracks: self.transport.outbound_tracks(),
            has_sink: self.sink.is_some(),
        }
    }

    /// Apply the candidate now if a remote description is present,
    /// otherwise hold it in arrival order.
    pub(crate) async fn apply_or_queue(
        &mut self,
        candidate: CandidateInit,
    ) -> Result<(), MediaError> {
        if self.transport.has_remote_description() {
            self.flush_candidates().await?;
            self.transport.add_ice_candidate(candidate).await
        } else {
            debug!(
                peer = %self.remote.short(),
                queued = self.pending_candidates.len() + 1,
                "Holding candidate until remote description is set"
            );
            self.pending_candidates.push_back(candidate);
            Ok(())
        }
    }

    /// Apply every held candidate in the order it arrived.
    pub(crate) async fn flush_candidates(&mut self) -> Result<(), MediaError> {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.transport.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    /// Set the remote description, then release any candidates that were
    /// waiting for it.
    pub(crate) async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.transport.set_remote_description(description).await?;
        self.flush_candidates().await
    }

    /// Attach every track the transport does not already carry. Returns
    /// whether anything new was attached.
    pub(crate) async fn attach_tracks(
        &mut self,
        tracks: &[TrackHandle],
    ) -> Result<bool, MediaError> {
        let existing = self.transport.outbound_tracks();
        let mut added = false;
        for track in tracks {
            if existing.iter().any(|t| t.id == track.id) {
                continue;
            }
            self.transport.add_track(track.clone()).await?;
            added = true;
        }
        Ok(added)
    }

    /// Close the transport and drop the sink.
    pub(crate) async fn close(&mut self) {
        self.transport.close().await;
        self.sink = None;
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
