//! Seam between session logic and the platform's media stack.
//!
//! The session never talks to a WebRTC implementation directly; it drives
//! these traits. The embedder implements them over the platform runtime,
//! and [`crate::testing`] provides a scripted in-memory implementation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use huddle_shared::protocol::{CandidateInit, IceConfig, SessionDescription};
use huddle_shared::UserId;

use crate::error::MediaError;

/// One captured or received media track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHandle {
    pub id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Requested camera capture parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProfile {
    pub width: u32,
    pub height: u32,
    pub front_facing: bool,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            width: huddle_shared::constants::CAPTURE_WIDTH,
            height: huddle_shared::constants::CAPTURE_HEIGHT,
            front_facing: true,
        }
    }
}

/// A local capture acquired from the runtime.
pub struct LocalMedia {
    pub stream_id: String,
    pub tracks: Vec<TrackHandle>,
    /// Analysis tap for speaking detection, present on audio captures.
    pub audio: Option<Box<dyn AudioProbe>>,
}

impl std::fmt::Debug for LocalMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMedia")
            .field("stream_id", &self.stream_id)
            .field("tracks", &self.tracks)
            .field("has_audio", &self.audio.is_some())
            .finish()
    }
}

impl LocalMedia {
    pub fn tracks_of(&self, kind: TrackKind) -> Vec<TrackHandle> {
        self.tracks.iter().filter(|t| t.kind == kind).cloned().collect()
    }
}

/// A remote peer's stream as delivered by the transport.
pub struct RemoteStream {
    pub id: String,
    /// Analysis tap for speaking detection, present when the stream
    /// carries audio.
    pub audio: Option<Box<dyn AudioProbe>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("id", &self.id)
            .field("has_audio", &self.audio.is_some())
            .finish()
    }
}

/// Connection health reported by a peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connected,
    Disconnected,
    Failed,
}

/// Asynchronous notifications from one peer transport, delivered on the
/// session's shared event channel tagged with the remote user id.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local ICE candidate finished gathering and must be relayed.
    CandidateGathered(CandidateInit),
    /// The transport's connection health changed.
    StateChanged(TransportState),
    /// The remote side's media stream arrived.
    RemoteStream(RemoteStream),
}

/// Factory for transports, captures, and sinks.
#[async_trait]
pub trait MediaRuntime: Send + Sync {
    /// Allocate a peer transport configured with the given ICE servers.
    /// The transport reports its [`TransportEvent`]s through `events`,
    /// tagged with `remote`.
    async fn create_peer(
        &self,
        remote: &UserId,
        ice: &IceConfig,
        events: mpsc::Sender<(UserId, TransportEvent)>,
    ) -> Result<Box<dyn PeerTransport>, MediaError>;

    /// Acquire the camera. Denial or absence of a device fails with
    /// [`MediaError::CaptureDenied`]; a later call may succeed.
    async fn acquire_camera(&self, profile: &CaptureProfile) -> Result<LocalMedia, MediaError>;

    /// Acquire the microphone.
    async fn acquire_microphone(&self) -> Result<LocalMedia, MediaError>;

    /// Stop a capture stream and release the device.
    fn stop_capture(&self, stream_id: &str);

    /// Flip a local track between live and muted without renegotiating.
    fn set_track_enabled(&self, track_id: &str, enabled: bool);

    /// Allocate a rendering sink for a remote stream. The sink is owned
    /// by the peer's link and released when it drops.
    fn create_sink(&self, peer: &UserId, stream_id: &str) -> Box<dyn MediaSink>;
}

/// One peer connection. Wraps the platform's offer/answer and ICE
/// machinery for a single remote participant.
#[async_trait]
pub trait PeerTransport: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError>;

    /// Generate an answer for the current remote offer. Fails when no
    /// remote description has been applied.
    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    /// Apply a relayed candidate. Callers must not invoke this before a
    /// remote description is set.
    async fn add_ice_candidate(&mut self, candidate: CandidateInit) -> Result<(), MediaError>;

    fn has_remote_description(&self) -> bool;

    /// Attach an outbound track. Adding an id that is already attached is
    /// a no-op.
    async fn add_track(&mut self, track: TrackHandle) -> Result<(), MediaError>;

    /// Detach an outbound track by id.
    async fn remove_track(&mut self, track_id: &str) -> Result<(), MediaError>;

    /// Currently attached outbound tracks.
    fn outbound_tracks(&self) -> Vec<TrackHandle>;

    async fn close(&mut self);
}

/// Rendering attachment for one remote stream. The sink is a pure
/// ownership handle: dropping it releases the rendering resource.
pub trait MediaSink: Send {}

/// Analysis tap over one audio stream. Each call yields the most recent
/// window of samples.
pub trait AudioProbe: Send {
    /// Copy the newest samples into `frame`, returning how many were
    /// written. Zero means the stream is currently silent or gone.
    fn sample(&mut self, frame: &mut [f32]) -> usize;
}
