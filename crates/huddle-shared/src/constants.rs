// Tuning constants shared across the session crates.

/// Reconnect attempts made after an unexpected signal channel drop
/// before the channel is declared failed.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 3;

/// Delay before the first reconnect attempt, in milliseconds.
/// Subsequent attempts double this value.
pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Ceiling on the reconnect backoff delay, in milliseconds.
pub const RECONNECT_MAX_DELAY_MS: u64 = 4_000;

/// FFT window length for voice activity detection (samples per frame).
pub const VAD_FFT_SIZE: usize = 256;

/// Mean spectral magnitude above which a frame counts as speech.
pub const VAD_SPEAKING_THRESHOLD: f32 = 0.05;

/// Requested video capture width in pixels.
pub const CAPTURE_WIDTH: u32 = 1280;

/// Requested video capture height in pixels.
pub const CAPTURE_HEIGHT: u32 = 720;

/// STUN server used when the relay supplies no ICE configuration.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Bound for the command and event channels between session tasks.
pub const CHANNEL_CAPACITY: usize = 256;
