use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Participant identity as issued by the identity provider (opaque string).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters of the id, for log fields. Ids are opaque
    /// strings, so the cut must land on a character boundary.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MeetingId(pub String);

impl MeetingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MeetingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MeetingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Chat message identifier.
///
/// Provisional messages carry a locally generated `temp-` id until the
/// relay confirms them with its own id; the temporary id never crosses
/// the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh temporary id for a locally echoed message.
    pub fn temp() -> Self {
        Self(format!("temp-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_short() {
        let id = UserId::new("abcdefghijkl");
        assert_eq!(id.short(), "abcdefgh");

        let tiny = UserId::new("ab");
        assert_eq!(tiny.short(), "ab");
    }

    #[test]
    fn test_user_id_short_respects_character_boundaries() {
        // Byte 8 falls inside '語'; a byte slice would panic here.
        let wide = UserId::new("日本語テスト");
        assert_eq!(wide.short(), "日本語テスト");

        let long_wide = UserId::new("参加者一二三四五六七");
        assert_eq!(long_wide.short(), "参加者一二三四五");
    }

    #[test]
    fn test_temp_message_ids_unique() {
        let a = MessageId::temp();
        let b = MessageId::temp();
        assert!(a.as_str().starts_with("temp-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_id_serializes_transparent() {
        let id = UserId::new("u-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"u-1\"");
    }
}
