// Per-peer connection negotiation, media capture control, and voice
// activity detection on top of a pluggable media runtime.

pub mod error;
pub mod link;
pub mod negotiation;
pub mod runtime;
pub mod toggle;
pub mod vad;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::MediaError;
pub use link::{LinkState, LinkSummary};
pub use negotiation::{EngineAction, NegotiationEngine, SignalPayload};
pub use runtime::{
    AudioProbe, CaptureProfile, LocalMedia, MediaRuntime, MediaSink, PeerTransport, RemoteStream,
    TrackHandle, TrackKind, TransportEvent, TransportState,
};
pub use toggle::{MediaToggle, ToggleOutcome};
pub use vad::{SpeakingTracker, SpectralDetector};
