//! Voice activity detection over audio probe frames.
//!
//! A 256 point FFT is taken over the newest window of samples and the
//! magnitudes of the lower half of the spectrum are averaged. A mean
//! above the speaking threshold marks the participant as speaking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::debug;

use huddle_shared::constants::{VAD_FFT_SIZE, VAD_SPEAKING_THRESHOLD};
use huddle_shared::UserId;

use crate::runtime::AudioProbe;

/// Energy detector for one frame of samples.
pub struct SpectralDetector {
    fft: Arc<dyn Fft<f32>>,
    threshold: f32,
    buffer: Vec<Complex<f32>>,
}

impl SpectralDetector {
    pub fn new() -> Self {
        Self::with_threshold(VAD_SPEAKING_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(VAD_FFT_SIZE),
            threshold,
            buffer: vec![Complex::new(0.0, 0.0); VAD_FFT_SIZE],
        }
    }

    /// Mean magnitude of the lower half of the spectrum. Frames shorter
    /// than the FFT size are zero padded.
    pub fn mean_magnitude(&mut self, frame: &[f32]) -> f32 {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = frame.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let half = VAD_FFT_SIZE / 2;
        let sum: f32 = self.buffer[..half].iter().map(|c| c.norm()).sum();
        sum / half as f32
    }

    pub fn is_speaking(&mut self, frame: &[f32]) -> bool {
        self.mean_magnitude(frame) > self.threshold
    }
}

impl Default for SpectralDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks which participants are currently speaking.
///
/// One probe per participant, the local user included. Each [`tick`]
/// samples every probe once and recomputes the speaking set.
///
/// [`tick`]: SpeakingTracker::tick
pub struct SpeakingTracker {
    detector: SpectralDetector,
    probes: HashMap<UserId, Box<dyn AudioProbe>>,
    speaking: HashSet<UserId>,
    frame: Vec<f32>,
}

impl SpeakingTracker {
    pub fn new() -> Self {
        Self {
            detector: SpectralDetector::new(),
            probes: HashMap::new(),
            speaking: HashSet::new(),
            frame: vec![0.0; VAD_FFT_SIZE],
        }
    }

    /// Start tracking a participant. A second probe for the same user
    /// replaces the first.
    pub fn attach(&mut self, user: UserId, probe: Box<dyn AudioProbe>) {
        debug!(user = %user.short(), "Tracking audio");
        self.probes.insert(user, probe);
    }

    /// Stop tracking a participant. They leave the speaking set
    /// immediately rather than on the next tick.
    pub fn detach(&mut self, user: &UserId) {
        if self.probes.remove(user).is_some() {
            debug!(user = %user.short(), "Stopped tracking audio");
        }
        self.speaking.remove(user);
    }

    /// Sample every probe once and recompute the speaking set.
    pub fn tick(&mut self) {
        let Self {
            ref mut detector,
            ref mut probes,
            ref mut speaking,
            ref mut frame,
        } = *self;

        for (user, probe) in probes.iter_mut() {
            frame.fill(0.0);
            let written = probe.sample(frame);
            if written > 0 && detector.is_speaking(frame) {
                speaking.insert(user.clone());
            } else {
                speaking.remove(user);
            }
        }
    }

    pub fn speaking(&self) -> &HashSet<UserId> {
        &self.speaking
    }

    pub fn is_speaking(&self, user: &UserId) -> bool {
        self.speaking.contains(user)
    }

    pub fn tracked(&self) -> usize {
        self.probes.len()
    }
}

impl Default for SpeakingTracker {
    fn default() -> Self {
        Self::new()
    }
}
