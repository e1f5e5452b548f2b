// Meeting session orchestration: one task owning the relay channels,
// negotiation engines, captures, and chat log, observed through snapshots.

pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod snapshot;

pub use chat::{ChatEntry, ChatLog, ChatMessage, SystemEvent, SystemKind};
pub use config::SessionConfig;
pub use error::SessionError;
pub use session::{spawn_session, SessionCommand};
pub use snapshot::{SessionErrors, SessionSnapshot};

// Re-exported because they appear in the config and snapshot types.
pub use huddle_signal::{ChannelState, ReconnectPolicy};
