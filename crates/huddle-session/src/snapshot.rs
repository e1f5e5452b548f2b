//! Read-only projection of the session published through a watch.
//!
//! The session task owns all mutable state; observers only ever see
//! these cloned snapshots, republished whenever something changed.

use std::collections::{HashMap, HashSet};

use huddle_media::LinkSummary;
use huddle_shared::UserId;
use huddle_signal::ChannelState;

use crate::chat::ChatEntry;

/// Errors currently surfaced to the user, one slot per scope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionErrors {
    /// The relay gave up; the session cannot recover on its own.
    pub fatal: Option<String>,
    /// Reconnection in progress; cleared when the relay comes back.
    pub transient: Option<String>,
    /// One failed peer does not affect the others.
    pub peer: HashMap<UserId, String>,
    /// Camera or microphone unavailable; retried on the next toggle.
    pub capture: Option<String>,
    /// The video room rejected the join. Not retryable this session.
    pub room_full: bool,
}

impl SessionErrors {
    pub fn is_clear(&self) -> bool {
        self.fatal.is_none()
            && self.transient.is_none()
            && self.peer.is_empty()
            && self.capture.is_none()
            && !self.room_full
    }
}

/// Everything an embedder needs to render the meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// State of the relay connection carrying chat and video.
    pub relay: ChannelState,
    /// State of the voice relay connection.
    pub voice_relay: ChannelState,
    /// Chat log in display order.
    pub chat: Vec<ChatEntry>,
    /// Video peer links, ordered by peer id.
    pub video_links: Vec<LinkSummary>,
    /// Voice peer links, ordered by peer id.
    pub voice_links: Vec<LinkSummary>,
    /// Participants currently speaking, the local user included.
    pub speaking: HashSet<UserId>,
    /// Last known camera state per remote peer.
    pub peer_video: HashMap<UserId, bool>,
    /// Whether the local camera is on.
    pub video_enabled: bool,
    /// Whether the local microphone is muted.
    pub muted: bool,
    pub errors: SessionErrors,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            relay: ChannelState::Connecting,
            voice_relay: ChannelState::Connecting,
            chat: Vec::new(),
            video_links: Vec::new(),
            voice_links: Vec::new(),
            speaking: HashSet::new(),
            peer_video: HashMap::new(),
            video_enabled: false,
            muted: false,
            errors: SessionErrors::default(),
        }
    }
}
