//! Session configuration loaded from environment variables.
//!
//! All settings have defaults so a session can be spawned with zero
//! configuration against a local relay.

use std::time::Duration;

use huddle_media::CaptureProfile;
use huddle_shared::protocol::{IceConfig, IceServer};
use huddle_shared::{MeetingId, UserId};
use huddle_signal::ReconnectPolicy;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Meeting to join.
    /// Env: `HUDDLE_MEETING_ID`
    /// Default: `"dev-meeting"`
    pub meeting_id: MeetingId,

    /// This participant's id, also used for offer glare tie-breaks.
    /// Env: `HUDDLE_USER_ID`
    /// Default: a fresh `user-<uuid>`.
    pub local_user: UserId,

    /// Display name shown next to chat messages.
    /// Env: `HUDDLE_DISPLAY_NAME`
    /// Default: `"Guest"`
    pub display_name: String,

    /// Bearer token presented on the relay upgrade.
    /// Env: `HUDDLE_AUTH_TOKEN`
    /// Default: none.
    pub auth_token: Option<String>,

    /// WebSocket URL of the relay connection carrying chat and video.
    /// Env: `HUDDLE_RELAY_URL`
    /// Default: `ws://127.0.0.1:4000/relay`
    pub relay_endpoint: String,

    /// WebSocket URL of the voice relay connection.
    /// Env: `HUDDLE_VOICE_URL`
    /// Default: `ws://127.0.0.1:4000/voice`
    pub voice_endpoint: String,

    /// STUN/TURN servers for video links, overriding whatever the relay
    /// sends in `ice-config`.
    /// Env: `HUDDLE_ICE_URLS` (comma separated)
    /// Default: none; the relay's value wins, with a built-in STUN
    /// fallback until it arrives.
    pub ice_override: Option<IceConfig>,

    /// Camera capture parameters.
    pub capture: CaptureProfile,

    /// Reconnect budget shared by both relay connections.
    pub reconnect: ReconnectPolicy,

    /// How often the speaking set is recomputed.
    pub vad_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            meeting_id: MeetingId::new("dev-meeting"),
            local_user: UserId::new(format!("user-{}", uuid::Uuid::new_v4())),
            display_name: "Guest".to_string(),
            auth_token: None,
            relay_endpoint: "ws://127.0.0.1:4000/relay".to_string(),
            voice_endpoint: "ws://127.0.0.1:4000/voice".to_string(),
            ice_override: None,
            capture: CaptureProfile::default(),
            reconnect: ReconnectPolicy::default(),
            vad_interval: Duration::from_millis(100),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(meeting) = std::env::var("HUDDLE_MEETING_ID") {
            config.meeting_id = MeetingId::new(meeting);
        }
        if let Ok(user) = std::env::var("HUDDLE_USER_ID") {
            config.local_user = UserId::new(user);
        }
        if let Ok(name) = std::env::var("HUDDLE_DISPLAY_NAME") {
            config.display_name = name;
        }
        if let Ok(token) = std::env::var("HUDDLE_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }
        if let Ok(url) = std::env::var("HUDDLE_RELAY_URL") {
            config.relay_endpoint = url;
        }
        if let Ok(url) = std::env::var("HUDDLE_VOICE_URL") {
            config.voice_endpoint = url;
        }
        if let Ok(urls) = std::env::var("HUDDLE_ICE_URLS") {
            let servers: Vec<IceServer> = urls
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(IceServer::stun)
                .collect();
            if !servers.is_empty() {
                config.ice_override = Some(IceConfig {
                    ice_servers: servers,
                });
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_complete() {
        let config = SessionConfig::default();
        assert_eq!(config.meeting_id.as_str(), "dev-meeting");
        assert!(config.local_user.as_str().starts_with("user-"));
        assert_eq!(config.display_name, "Guest");
        assert!(config.auth_token.is_none());
        assert!(config.ice_override.is_none());
        assert!(config.relay_endpoint.starts_with("ws://"));
        assert_eq!(config.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_default_user_ids_are_unique() {
        let a = SessionConfig::default();
        let b = SessionConfig::default();
        assert_ne!(a.local_user, b.local_user);
    }
}
