use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Capture denied or unavailable: {0}")]
    CaptureDenied(String),

    #[error("No remote description set")]
    NoRemoteDescription,

    /// Catch-all for failures inside a [`MediaRuntime`](crate::runtime::MediaRuntime)
    /// implementation.
    #[error("Peer transport error: {0}")]
    Transport(String),
}
