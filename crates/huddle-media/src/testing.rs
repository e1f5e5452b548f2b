//! Scripted in-memory media runtime for tests.
//!
//! Every handle shares one state cell, so a test can keep a
//! [`MockRuntime`] clone and inspect what the engine did to any peer
//! transport, capture, or sink it handed out.

use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use huddle_shared::constants::VAD_FFT_SIZE;
use huddle_shared::protocol::{CandidateInit, IceConfig, SdpKind, SessionDescription};
use huddle_shared::UserId;

use crate::error::MediaError;
use crate::runtime::{
    AudioProbe, CaptureProfile, LocalMedia, MediaRuntime, MediaSink, PeerTransport, TrackHandle,
    TrackKind, TransportEvent,
};

#[derive(Default)]
struct MockState {
    peers: HashMap<String, PeerRecord>,
    event_senders: HashMap<String, mpsc::Sender<(UserId, TransportEvent)>>,
    cameras_acquired: u32,
    microphones_acquired: u32,
    stopped_captures: Vec<String>,
    dropped_sinks: Vec<String>,
    track_enabled: HashMap<String, bool>,
    deny_camera: bool,
}

/// Observable history of one mock peer transport.
#[derive(Debug, Clone, Default)]
pub struct PeerRecord {
    pub offers_created: u32,
    pub answers_created: u32,
    pub remote_descriptions: Vec<SessionDescription>,
    /// Candidate strings in the order the transport applied them.
    pub candidates_applied: Vec<String>,
    pub tracks: Vec<TrackHandle>,
    pub has_remote: bool,
    pub closed: bool,
    pub ice_urls: Vec<String>,
}

/// Media runtime whose transports record everything and whose captures
/// hand out stable ids, so repeated acquire/stop cycles restore the
/// exact same track set.
#[derive(Clone, Default)]
pub struct MockRuntime {
    state: Arc<Mutex<MockState>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next camera acquisitions fail with `CaptureDenied`.
    pub fn set_deny_camera(&self, deny: bool) {
        self.state.lock().unwrap().deny_camera = deny;
    }

    pub fn peer_record(&self, peer: &UserId) -> PeerRecord {
        self.state
            .lock()
            .unwrap()
            .peers
            .get(peer.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn peers_created(&self) -> usize {
        self.state.lock().unwrap().peers.len()
    }

    pub fn cameras_acquired(&self) -> u32 {
        self.state.lock().unwrap().cameras_acquired
    }

    pub fn microphones_acquired(&self) -> u32 {
        self.state.lock().unwrap().microphones_acquired
    }

    pub fn stopped_captures(&self) -> Vec<String> {
        self.state.lock().unwrap().stopped_captures.clone()
    }

    pub fn dropped_sinks(&self) -> Vec<String> {
        self.state.lock().unwrap().dropped_sinks.clone()
    }

    pub fn track_enabled(&self, track_id: &str) -> Option<bool> {
        self.state.lock().unwrap().track_enabled.get(track_id).copied()
    }

    /// Inject a transport event as if the peer's own transport raised it.
    pub async fn push_event(&self, peer: &UserId, event: TransportEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .event_senders
            .get(peer.as_str())
            .cloned();
        if let Some(sender) = sender {
            let _ = sender.send((peer.clone(), event)).await;
        }
    }
}

#[async_trait]
impl MediaRuntime for MockRuntime {
    async fn create_peer(
        &self,
        remote: &UserId,
        ice: &IceConfig,
        events: mpsc::Sender<(UserId, TransportEvent)>,
    ) -> Result<Box<dyn PeerTransport>, MediaError> {
        let mut state = self.state.lock().unwrap();
        let record = state.peers.entry(remote.as_str().to_string()).or_default();
        record.ice_urls = ice
            .ice_servers
            .iter()
            .flat_map(|server| server.urls.clone())
            .collect();
        state.event_senders.insert(remote.as_str().to_string(), events);
        Ok(Box::new(MockPeer {
            remote: remote.clone(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn acquire_camera(&self, _profile: &CaptureProfile) -> Result<LocalMedia, MediaError> {
        let mut state = self.state.lock().unwrap();
        if state.deny_camera {
            return Err(MediaError::CaptureDenied(
                "camera permission denied".to_string(),
            ));
        }
        state.cameras_acquired += 1;
        Ok(LocalMedia {
            stream_id: "cam-0".to_string(),
            tracks: vec![TrackHandle {
                id: "cam-video-0".to_string(),
                kind: TrackKind::Video,
            }],
            audio: None,
        })
    }

    async fn acquire_microphone(&self) -> Result<LocalMedia, MediaError> {
        self.state.lock().unwrap().microphones_acquired += 1;
        Ok(LocalMedia {
            stream_id: "mic-0".to_string(),
            tracks: vec![TrackHandle {
                id: "mic-audio-0".to_string(),
                kind: TrackKind::Audio,
            }],
            audio: Some(Box::new(MockProbe::new(0.5))),
        })
    }

    fn stop_capture(&self, stream_id: &str) {
        self.state
            .lock()
            .unwrap()
            .stopped_captures
            .push(stream_id.to_string());
    }

    fn set_track_enabled(&self, track_id: &str, enabled: bool) {
        self.state
            .lock()
            .unwrap()
            .track_enabled
            .insert(track_id.to_string(), enabled);
    }

    fn create_sink(&self, _peer: &UserId, stream_id: &str) -> Box<dyn MediaSink> {
        Box::new(MockSink {
            stream_id: stream_id.to_string(),
            state: Arc::clone(&self.state),
        })
    }
}

struct MockPeer {
    remote: UserId,
    state: Arc<Mutex<MockState>>,
}

impl MockPeer {
    fn with_record<R>(&self, f: impl FnOnce(&mut PeerRecord) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(state.peers.entry(self.remote.as_str().to_string()).or_default())
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn create_offer(&mut self) -> Result<SessionDescription, MediaError> {
        let n = self.with_record(|record| {
            record.offers_created += 1;
            record.offers_created
        });
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: format!("offer-{}-{n}", self.remote.as_str()),
        })
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, MediaError> {
        let remote = self.remote.as_str().to_string();
        self.with_record(|record| {
            if !record.has_remote {
                return Err(MediaError::NoRemoteDescription);
            }
            record.answers_created += 1;
            Ok(SessionDescription {
                kind: SdpKind::Answer,
                sdp: format!("answer-{remote}-{}", record.answers_created),
            })
        })
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.with_record(|record| {
            record.has_remote = true;
            record.remote_descriptions.push(description);
        });
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: CandidateInit) -> Result<(), MediaError> {
        self.with_record(|record| {
            if !record.has_remote {
                return Err(MediaError::NoRemoteDescription);
            }
            record.candidates_applied.push(candidate.candidate);
            Ok(())
        })
    }

    fn has_remote_description(&self) -> bool {
        self.with_record(|record| record.has_remote)
    }

    async fn add_track(&mut self, track: TrackHandle) -> Result<(), MediaError> {
        self.with_record(|record| {
            if !record.tracks.iter().any(|t| t.id == track.id) {
                record.tracks.push(track);
            }
        });
        Ok(())
    }

    async fn remove_track(&mut self, track_id: &str) -> Result<(), MediaError> {
        self.with_record(|record| record.tracks.retain(|t| t.id != track_id));
        Ok(())
    }

    fn outbound_tracks(&self) -> Vec<TrackHandle> {
        self.with_record(|record| record.tracks.clone())
    }

    async fn close(&mut self) {
        self.with_record(|record| record.closed = true);
    }
}

struct MockSink {
    stream_id: String,
    state: Arc<Mutex<MockState>>,
}

impl MediaSink for MockSink {}

impl Drop for MockSink {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.dropped_sinks.push(self.stream_id.clone());
        }
    }
}

/// Audio probe that synthesizes a pure tone. The level handle lets a
/// test change the amplitude after the probe has been handed off.
pub struct MockProbe {
    level: Arc<Mutex<f32>>,
    bin: usize,
}

impl MockProbe {
    pub fn new(amplitude: f32) -> Self {
        Self {
            level: Arc::new(Mutex::new(amplitude)),
            bin: 8,
        }
    }

    /// Shared amplitude control, cloned before boxing the probe.
    pub fn level(&self) -> Arc<Mutex<f32>> {
        Arc::clone(&self.level)
    }
}

impl AudioProbe for MockProbe {
    fn sample(&mut self, frame: &mut [f32]) -> usize {
        let amplitude = *self.level.lock().unwrap();
        let n = frame.len().min(VAD_FFT_SIZE);
        for (i, sample) in frame.iter_mut().take(n).enumerate() {
            *sample = amplitude * (TAU * self.bin as f32 * i as f32 / VAD_FFT_SIZE as f32).sin();
        }
        n
    }
}
