//! Local capture control: camera on/off and microphone mute.
//!
//! Turning video on acquires the camera and renegotiates every affected
//! link. Turning it off detaches the tracks and releases the device
//! without renegotiating. Mute only flips track enablement and never
//! touches negotiation at all.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::MediaError;
use crate::negotiation::{EngineAction, NegotiationEngine};
use crate::runtime::{AudioProbe, CaptureProfile, LocalMedia, MediaRuntime, TrackHandle, TrackKind};

/// Result of one video toggle request.
#[derive(Debug)]
pub struct ToggleOutcome {
    /// Whether local video is on after the toggle.
    pub enabled: bool,
    /// Renegotiation actions the session must carry out.
    pub actions: Vec<EngineAction>,
}

/// Owns the local captures and the muted flag.
pub struct MediaToggle {
    runtime: Arc<dyn MediaRuntime>,
    profile: CaptureProfile,
    camera: Option<LocalMedia>,
    microphone: Option<LocalMedia>,
    muted: bool,
}

impl MediaToggle {
    pub fn new(runtime: Arc<dyn MediaRuntime>, profile: CaptureProfile) -> Self {
        Self {
            runtime,
            profile,
            camera: None,
            microphone: None,
            muted: false,
        }
    }

    pub fn video_on(&self) -> bool {
        self.camera.is_some()
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn local_video_tracks(&self) -> Vec<TrackHandle> {
        self.camera
            .as_ref()
            .map(|media| media.tracks_of(TrackKind::Video))
            .unwrap_or_default()
    }

    pub fn local_audio_tracks(&self) -> Vec<TrackHandle> {
        self.microphone
            .as_ref()
            .map(|media| media.tracks_of(TrackKind::Audio))
            .unwrap_or_default()
    }

    /// Acquire the camera if it is not already running. A denied capture
    /// leaves video off; the next call retries from scratch.
    pub async fn start_video(&mut self) -> Result<Vec<TrackHandle>, MediaError> {
        if let Some(camera) = &self.camera {
            return Ok(camera.tracks_of(TrackKind::Video));
        }
        let camera = self.runtime.acquire_camera(&self.profile).await?;
        info!(stream = %camera.stream_id, "Camera capture started");
        let tracks = camera.tracks_of(TrackKind::Video);
        self.camera = Some(camera);
        Ok(tracks)
    }

    /// Detach the camera tracks from every link and release the device.
    /// Peers learn about the removal from the toggle relay event, so no
    /// renegotiation happens here.
    pub async fn stop_video(
        &mut self,
        engine: &mut NegotiationEngine,
    ) -> Result<(), MediaError> {
        let Some(camera) = self.camera.take() else {
            return Ok(());
        };
        for track in camera.tracks_of(TrackKind::Video) {
            engine.remove_track_from_all(&track.id).await?;
        }
        self.runtime.stop_capture(&camera.stream_id);
        info!(stream = %camera.stream_id, "Camera capture stopped");
        Ok(())
    }

    /// Flip local video and return the renegotiation work it caused.
    pub async fn toggle_video(
        &mut self,
        engine: &mut NegotiationEngine,
    ) -> Result<ToggleOutcome, MediaError> {
        if self.camera.is_none() {
            let tracks = self.start_video().await?;
            let mut actions = Vec::new();
            for track in &tracks {
                actions.extend(engine.attach_track_to_all(track).await?);
            }
            Ok(ToggleOutcome {
                enabled: true,
                actions,
            })
        } else {
            self.stop_video(engine).await?;
            Ok(ToggleOutcome {
                enabled: false,
                actions: Vec::new(),
            })
        }
    }

    /// Acquire the microphone and hand out its analysis probe. Returns
    /// `None` when the microphone is already running; the probe was
    /// handed out on the first call.
    pub async fn start_microphone(&mut self) -> Result<Option<Box<dyn AudioProbe>>, MediaError> {
        if self.microphone.is_some() {
            return Ok(None);
        }
        let mut microphone = self.runtime.acquire_microphone().await?;
        info!(stream = %microphone.stream_id, "Microphone capture started");
        let probe = microphone.audio.take();
        if probe.is_none() {
            warn!(stream = %microphone.stream_id, "Microphone capture has no analysis probe");
        }
        if self.muted {
            for track in microphone.tracks_of(TrackKind::Audio) {
                self.runtime.set_track_enabled(&track.id, false);
            }
        }
        self.microphone = Some(microphone);
        Ok(probe)
    }

    /// Flip the muted flag and the enablement of every microphone track.
    /// Tracks stay attached, so nothing is renegotiated.
    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        for track in self.local_audio_tracks() {
            self.runtime.set_track_enabled(&track.id, !muted);
        }
        debug!(muted, "Microphone mute changed");
    }

    /// Release every capture without touching peer links. Used on
    /// teardown, after the links are already closing.
    pub fn release(&mut self) {
        if let Some(camera) = self.camera.take() {
            self.runtime.stop_capture(&camera.stream_id);
        }
        if let Some(microphone) = self.microphone.take() {
            self.runtime.stop_capture(&microphone.stream_id);
        }
    }
}

impl std::fmt::Debug for MediaToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaToggle")
            .field("video_on", &self.camera.is_some())
            .field("microphone_on", &self.microphone.is_some())
            .field("muted", &self.muted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::SignalPayload;
    use crate::runtime::{TransportEvent, TransportState};
    use crate::testing::MockRuntime;
    use huddle_shared::protocol::{SdpKind, SessionDescription};
    use huddle_shared::UserId;
    use tokio::sync::mpsc;

    fn answer() -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: "remote-answer".to_string(),
        }
    }

    async fn connected_setup() -> (MediaToggle, NegotiationEngine, MockRuntime, UserId) {
        let runtime = MockRuntime::new();
        let (events_tx, _events_rx) = mpsc::channel(64);
        let mut engine = NegotiationEngine::new(
            UserId::new("alice"),
            Arc::new(runtime.clone()),
            events_tx,
        );

        let bob = UserId::new("bob");
        engine.create_offer(&bob, &[]).await.unwrap();
        engine.handle_answer(&bob, answer()).await.unwrap();
        engine
            .handle_transport_event(&bob, TransportEvent::StateChanged(TransportState::Connected))
            .await
            .unwrap();

        let toggle = MediaToggle::new(Arc::new(runtime.clone()), CaptureProfile::default());
        (toggle, engine, runtime, bob)
    }

    #[tokio::test]
    async fn test_toggle_on_attaches_and_renegotiates() {
        let (mut toggle, mut engine, runtime, bob) = connected_setup().await;

        let outcome = toggle.toggle_video(&mut engine).await.unwrap();

        assert!(outcome.enabled);
        assert!(toggle.video_on());
        assert!(matches!(
            outcome.actions.as_slice(),
            [EngineAction::Signal { to, payload: SignalPayload::Offer(_) }] if *to == bob
        ));
        let record = runtime.peer_record(&bob);
        assert_eq!(record.tracks.len(), 1);
        assert_eq!(record.tracks[0].id, "cam-video-0");
    }

    #[tokio::test]
    async fn test_toggle_off_detaches_without_renegotiation() {
        let (mut toggle, mut engine, runtime, bob) = connected_setup().await;

        toggle.toggle_video(&mut engine).await.unwrap();
        let offers_after_on = runtime.peer_record(&bob).offers_created;

        let outcome = toggle.toggle_video(&mut engine).await.unwrap();

        assert!(!outcome.enabled);
        assert!(outcome.actions.is_empty());
        assert!(runtime.peer_record(&bob).tracks.is_empty());
        assert_eq!(runtime.peer_record(&bob).offers_created, offers_after_on);
        assert_eq!(runtime.stopped_captures(), vec!["cam-0".to_string()]);
    }

    #[tokio::test]
    async fn test_toggle_cycle_restores_identical_tracks() {
        let (mut toggle, mut engine, runtime, bob) = connected_setup().await;

        toggle.toggle_video(&mut engine).await.unwrap();
        toggle.toggle_video(&mut engine).await.unwrap();
        toggle.toggle_video(&mut engine).await.unwrap();

        let record = runtime.peer_record(&bob);
        assert_eq!(record.tracks.len(), 1);
        assert_eq!(record.tracks[0].id, "cam-video-0");
        assert_eq!(runtime.cameras_acquired(), 2);
    }

    #[tokio::test]
    async fn test_denied_camera_leaves_video_off_and_retries() {
        let (mut toggle, mut engine, runtime, _bob) = connected_setup().await;

        runtime.set_deny_camera(true);
        let denied = toggle.toggle_video(&mut engine).await;
        assert!(matches!(denied, Err(MediaError::CaptureDenied(_))));
        assert!(!toggle.video_on());

        runtime.set_deny_camera(false);
        let outcome = toggle.toggle_video(&mut engine).await.unwrap();
        assert!(outcome.enabled);
        assert!(toggle.video_on());
    }

    #[tokio::test]
    async fn test_mute_flips_tracks_without_offers() {
        let (mut toggle, _engine, runtime, bob) = connected_setup().await;

        let probe = toggle.start_microphone().await.unwrap();
        assert!(probe.is_some());
        assert!(toggle.start_microphone().await.unwrap().is_none());
        assert_eq!(runtime.microphones_acquired(), 1);

        let offers_before = runtime.peer_record(&bob).offers_created;
        toggle.set_muted(true);
        assert!(toggle.is_muted());
        assert_eq!(runtime.track_enabled("mic-audio-0"), Some(false));

        toggle.set_muted(false);
        assert_eq!(runtime.track_enabled("mic-audio-0"), Some(true));
        assert_eq!(runtime.peer_record(&bob).offers_created, offers_before);
    }

    #[tokio::test]
    async fn test_mute_before_microphone_start_applies_on_start() {
        let (mut toggle, _engine, runtime, _bob) = connected_setup().await;

        toggle.set_muted(true);
        toggle.start_microphone().await.unwrap();

        assert_eq!(runtime.track_enabled("mic-audio-0"), Some(false));
    }

    #[tokio::test]
    async fn test_release_stops_all_captures() {
        let (mut toggle, mut engine, runtime, _bob) = connected_setup().await;

        toggle.toggle_video(&mut engine).await.unwrap();
        toggle.start_microphone().await.unwrap();
        toggle.release();

        assert!(!toggle.video_on());
        let stopped = runtime.stopped_captures();
        assert!(stopped.contains(&"cam-0".to_string()));
        assert!(stopped.contains(&"mic-0".to_string()));
    }
}
