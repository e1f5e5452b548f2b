//! Chat log reconciliation.
//!
//! Outgoing messages are appended immediately under a provisional id so
//! the sender sees them without waiting for the relay. When the server's
//! authoritative copy arrives it replaces the provisional entry in
//! place, keeping the log's order stable. History snapshots replace the
//! log wholesale, which also deduplicates after a reconnect.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use huddle_shared::protocol::WireChatMessage;
use huddle_shared::{MessageId, UserId};

/// One chat message as displayed, local provisional copies included.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub time: DateTime<Utc>,
    /// Sent locally but not yet confirmed by the relay.
    pub is_provisional: bool,
}

impl From<WireChatMessage> for ChatMessage {
    fn from(wire: WireChatMessage) -> Self {
        Self {
            id: wire.id,
            sender_id: wire.sender_id,
            sender_name: wire.sender_name,
            text: wire.text,
            time: wire.time,
            is_provisional: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemKind {
    Joined,
    Left,
    Ended,
    /// Neutral notice, marks where the replayed history ends.
    Info,
}

/// A neutral notice rendered inline with the messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemEvent {
    pub kind: SystemKind,
    /// Display name of the participant the notice is about, absent for
    /// meeting-wide notices.
    pub subject: Option<String>,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEntry {
    Message(ChatMessage),
    System(SystemEvent),
}

/// Ordered chat log for one meeting.
#[derive(Debug)]
pub struct ChatLog {
    local_user: UserId,
    local_name: String,
    entries: Vec<ChatEntry>,
    ended: bool,
}

impl ChatLog {
    pub fn new(local_user: UserId, local_name: impl Into<String>) -> Self {
        Self {
            local_user,
            local_name: local_name.into(),
            entries: Vec::new(),
            ended: false,
        }
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Append a provisional entry for an outgoing message and return the
    /// trimmed text to put on the wire. Whitespace-only input is
    /// rejected and nothing is staged.
    pub fn stage_outgoing(&mut self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        self.entries.push(ChatEntry::Message(ChatMessage {
            id: MessageId::temp(),
            sender_id: self.local_user.clone(),
            sender_name: self.local_name.clone(),
            text: trimmed.to_string(),
            time: Utc::now(),
            is_provisional: true,
        }));
        Some(trimmed.to_string())
    }

    /// Fold a relayed message into the log. The first provisional entry
    /// with the same sender and text is replaced in place, exactly once;
    /// everything else is appended.
    pub fn apply_incoming(&mut self, wire: WireChatMessage) {
        let confirmed = ChatMessage::from(wire);
        let provisional_slot = self.entries.iter_mut().find(|entry| {
            matches!(
                entry,
                ChatEntry::Message(message)
                    if message.is_provisional
                        && message.sender_id == confirmed.sender_id
                        && message.text == confirmed.text
            )
        });

        match provisional_slot {
            Some(entry) => {
                debug!(id = %confirmed.id, "Confirmed provisional message");
                *entry = ChatEntry::Message(confirmed);
            }
            None => self.entries.push(ChatEntry::Message(confirmed)),
        }
    }

    /// Replace the log with the server's history snapshot, closed by an
    /// `Info` notice separating replayed messages from live ones.
    pub fn apply_history(&mut self, history: Vec<WireChatMessage>) {
        debug!(count = history.len(), "Applying chat history");
        self.entries = history
            .into_iter()
            .map(|wire| ChatEntry::Message(ChatMessage::from(wire)))
            .collect();
        self.entries.push(ChatEntry::System(SystemEvent {
            kind: SystemKind::Info,
            subject: None,
            time: Utc::now(),
        }));
        self.ended = false;
    }

    pub fn user_joined(&mut self, name: &str) {
        self.entries.push(ChatEntry::System(SystemEvent {
            kind: SystemKind::Joined,
            subject: Some(name.to_string()),
            time: Utc::now(),
        }));
    }

    pub fn user_left(&mut self, name: &str) {
        self.entries.push(ChatEntry::System(SystemEvent {
            kind: SystemKind::Left,
            subject: Some(name.to_string()),
            time: Utc::now(),
        }));
    }

    /// Clear the log and leave a single "meeting ended" notice. Repeat
    /// deliveries of the end event change nothing.
    pub fn meeting_ended(&mut self) {
        if self.ended {
            return;
        }
        info!("Meeting ended, clearing chat history");
        self.entries.clear();
        self.entries.push(ChatEntry::System(SystemEvent {
            kind: SystemKind::Ended,
            subject: None,
            time: Utc::now(),
        }));
        self.ended = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(id: &str, sender: &str, name: &str, text: &str) -> WireChatMessage {
        WireChatMessage {
            id: MessageId::new(id),
            sender_id: UserId::new(sender),
            sender_name: name.to_string(),
            text: text.to_string(),
            time: Utc::now(),
        }
    }

    fn log() -> ChatLog {
        ChatLog::new(UserId::new("alice"), "Alice")
    }

    fn message_at(log: &ChatLog, index: usize) -> &ChatMessage {
        match &log.entries()[index] {
            ChatEntry::Message(message) => message,
            other => panic!("expected message at {index}, got {other:?}"),
        }
    }

    #[test]
    fn test_stage_trims_and_rejects_empty() {
        let mut log = log();

        assert_eq!(log.stage_outgoing("  hello  "), Some("hello".to_string()));
        assert_eq!(log.stage_outgoing("   "), None);
        assert_eq!(log.stage_outgoing(""), None);

        assert_eq!(log.entries().len(), 1);
        let staged = message_at(&log, 0);
        assert_eq!(staged.text, "hello");
        assert!(staged.is_provisional);
        assert!(staged.id.as_str().starts_with("temp-"));
    }

    #[test]
    fn test_confirmation_replaces_provisional_in_place_exactly_once() {
        let mut log = log();
        log.stage_outgoing("first").unwrap();
        log.stage_outgoing("second").unwrap();

        log.apply_incoming(wire("srv-1", "alice", "Alice", "first"));

        // Replaced in place: order unchanged, server id adopted.
        assert_eq!(log.entries().len(), 2);
        let confirmed = message_at(&log, 0);
        assert_eq!(confirmed.id.as_str(), "srv-1");
        assert!(!confirmed.is_provisional);
        assert!(message_at(&log, 1).is_provisional);

        // No provisional copy of "first" remains, so a repeat appends.
        log.apply_incoming(wire("srv-9", "alice", "Alice", "first"));
        assert_eq!(log.entries().len(), 3);
    }

    #[test]
    fn test_identical_texts_confirm_one_provisional_each() {
        let mut log = log();
        log.stage_outgoing("ping").unwrap();
        log.stage_outgoing("ping").unwrap();

        log.apply_incoming(wire("srv-1", "alice", "Alice", "ping"));
        log.apply_incoming(wire("srv-2", "alice", "Alice", "ping"));

        // Each confirmation lands on the next provisional in order.
        assert_eq!(log.entries().len(), 2);
        assert_eq!(message_at(&log, 0).id.as_str(), "srv-1");
        assert_eq!(message_at(&log, 1).id.as_str(), "srv-2");
        assert!(!message_at(&log, 0).is_provisional);
        assert!(!message_at(&log, 1).is_provisional);
    }

    #[test]
    fn test_remote_message_appends_without_touching_provisionals() {
        let mut log = log();
        log.stage_outgoing("hello").unwrap();

        log.apply_incoming(wire("srv-2", "bob", "Bob", "hello"));

        assert_eq!(log.entries().len(), 2);
        assert!(message_at(&log, 0).is_provisional);
        assert_eq!(message_at(&log, 1).sender_name, "Bob");
    }

    #[test]
    fn test_history_replaces_log_wholesale() {
        let mut log = log();
        log.stage_outgoing("stale").unwrap();
        log.user_joined("Bob");

        log.apply_history(vec![
            wire("srv-1", "bob", "Bob", "one"),
            wire("srv-2", "carol", "Carol", "two"),
        ]);

        assert_eq!(log.entries().len(), 3);
        assert_eq!(message_at(&log, 0).text, "one");
        assert_eq!(message_at(&log, 1).text, "two");
        assert!(!message_at(&log, 0).is_provisional);
        assert!(matches!(
            &log.entries()[2],
            ChatEntry::System(SystemEvent { kind: SystemKind::Info, subject: None, .. })
        ));
    }

    #[test]
    fn test_meeting_ended_clears_and_is_idempotent() {
        let mut log = log();
        log.stage_outgoing("hello").unwrap();
        log.user_joined("Bob");

        log.meeting_ended();
        log.meeting_ended();

        assert_eq!(log.entries().len(), 1);
        assert!(matches!(
            &log.entries()[0],
            ChatEntry::System(SystemEvent { kind: SystemKind::Ended, .. })
        ));
        assert!(log.is_ended());
    }

    #[test]
    fn test_presence_notices_append_in_order() {
        let mut log = log();
        log.user_joined("Bob");
        log.user_left("Bob");

        assert_eq!(log.entries().len(), 2);
        assert!(matches!(
            &log.entries()[0],
            ChatEntry::System(SystemEvent { kind: SystemKind::Joined, subject: Some(name), .. })
                if name == "Bob"
        ));
        assert!(matches!(
            &log.entries()[1],
            ChatEntry::System(SystemEvent { kind: SystemKind::Left, .. })
        ));
    }
}
