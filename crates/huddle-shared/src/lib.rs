// Shared identifiers, relay wire protocol, and tuning constants.

pub mod constants;
pub mod protocol;
pub mod types;

pub use types::{MeetingId, MessageId, UserId};
