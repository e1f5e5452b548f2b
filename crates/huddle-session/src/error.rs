use thiserror::Error;

/// Failure to establish a session.
///
/// Only channel setup can fail the join; everything after that surfaces
/// through the error slots of the snapshot instead.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Signal channel error: {0}")]
    Channel(#[from] huddle_signal::ChannelError),
}
