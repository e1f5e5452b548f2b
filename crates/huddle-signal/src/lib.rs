// Signal channel layer: persistent relay connections with auth, room join,
// and bounded reconnection.

pub mod channel;
pub mod error;
pub mod reconnect;
pub mod state;

pub use channel::{spawn_channel, ChannelConfig, ChannelEvent, SignalChannel, SignalSender};
pub use error::ChannelError;
pub use reconnect::ReconnectPolicy;
pub use state::ChannelState;
