use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Relay rejected the auth token")]
    AuthRejected,

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Channel is closed")]
    Closed,

    #[error("Auth token is not a valid header value")]
    InvalidToken,

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl ChannelError {
    /// Whether this error ends the channel for good (no retry will help).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthRejected | Self::Closed)
    }
}
