use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MeetingId, MessageId, UserId};

/// Inbound events on the chat concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChatServerEvent {
    /// Full message history, oldest first, sent once after joining
    ChatHistory(Vec<WireChatMessage>),

    /// A confirmed message, echoed to every participant including the sender
    NewMessage(WireChatMessage),

    /// A participant entered the meeting
    UserJoined(Presence),

    /// A participant left the meeting
    UserLeft(Presence),

    /// The host ended the meeting for everyone
    MeetingEnded(MeetingEnded),
}

/// Outbound events on the chat concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ChatClientEvent {
    /// Join the meeting's chat room
    JoinMeeting(MeetingId),

    /// Send a chat message
    SendMessage(SendMessage),
}

/// Inbound events on the video concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum VideoServerEvent {
    /// STUN/TURN servers to use for every peer connection this session
    IceConfig(IceConfig),

    /// Roster of participants already in the room when we joined
    ExistingUsers(ExistingUsers),

    /// A new participant joined after us
    UserJoined(PeerJoined),

    /// SDP offer from a remote peer
    VideoOffer(OfferIn),

    /// SDP answer from a remote peer
    VideoAnswer(AnswerIn),

    /// ICE candidate from a remote peer
    IceCandidate(CandidateIn),

    /// A remote peer turned its camera on or off
    PeerToggleVideo(PeerToggleVideo),

    /// A remote peer left the room
    PeerDisconnected(PeerDisconnected),

    /// The room is at capacity; the join was refused
    #[serde(rename = "roomFull")]
    RoomFull,
}

/// Outbound events on the video concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum VideoClientEvent {
    /// Join the meeting's video room
    JoinVideoRoom(MeetingId),

    /// SDP offer addressed to one peer
    VideoOffer(OfferOut),

    /// SDP answer addressed to one peer
    VideoAnswer(AnswerOut),

    /// ICE candidate addressed to one peer
    IceCandidate(CandidateOut),

    /// Tell the room our camera turned on or off
    ToggleVideo(ToggleVideo),
}

/// Inbound events on the voice concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum VoiceServerEvent {
    /// A participant connected to the voice room
    UserConnected(UserId),

    /// Signaling payload relayed from a peer
    Signal(SignalIn),

    /// A participant dropped from the voice room
    UserDisconnected(UserId),
}

/// Outbound events on the voice concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum VoiceClientEvent {
    /// Join the meeting's voice room
    JoinMeeting(VoiceJoin),

    /// Signaling payload addressed to one peer
    Signal(SignalOut),
}

/// Events arriving on a connection shared by the chat and video concerns.
///
/// `user-joined` exists in both families; the chat payload carries
/// `userName` while the video payload does not, so the chat variant must
/// be tried first.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SharedServerEvent {
    Chat(ChatServerEvent),
    Video(VideoServerEvent),
}

/// A chat message as the relay represents it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub time: DateTime<Utc>,
}

/// Join/leave notification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEnded {
    pub meeting_id: MeetingId,
    /// Whether the relay wiped the stored history
    pub cleared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub meeting_id: MeetingId,
    pub text: String,
}

/// STUN/TURN configuration supplied by the relay at connect time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IceConfig {
    pub ice_servers: Vec<IceServer>,
}

/// One STUN or TURN server descriptor.
///
/// `urls` may arrive as a single string or a list; both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExistingUsers {
    pub users: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoined {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferIn {
    pub offer: SessionDescription,
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferOut {
    pub offer: SessionDescription,
    pub room_id: MeetingId,
    pub to: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerIn {
    pub answer: SessionDescription,
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
    pub answer: SessionDescription,
    pub room_id: MeetingId,
    pub to: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateIn {
    pub candidate: CandidateInit,
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateOut {
    pub candidate: CandidateInit,
    pub room_id: MeetingId,
    pub to: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerToggleVideo {
    pub peer_id: UserId,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PeerDisconnected {
    pub peer_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleVideo {
    pub room_id: MeetingId,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceJoin {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalIn {
    pub from: UserId,
    pub signal_data: SignalData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignalOut {
    pub to: UserId,
    pub from: UserId,
    pub signal_data: SignalData,
}

/// An SDP description as exchanged on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An ICE candidate as exchanged on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u32>,
}

/// Voice signaling payload: a description or a candidate, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalData {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: CandidateInit },
}

impl SignalData {
    /// Wrap a local description for the wire.
    pub fn from_description(desc: SessionDescription) -> Self {
        match desc.kind {
            SdpKind::Offer => Self::Offer { sdp: desc.sdp },
            SdpKind::Answer => Self::Answer { sdp: desc.sdp },
        }
    }
}
