//! Wire types for the Atlantium realtime connection and backend REST surface.
//!
//! Realtime frames are tagged as `{"type": ..., "data": ...}`. Application
//! events travel inside `message` frames as loosely-shaped JSON envelopes
//! (see [`crate::normalize`]); the structs here describe the shapes this
//! client produces and the shapes the backend returns.

use serde::{Deserialize, Serialize};

use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for users.
pub type UserId = String;

/// Unique identifier for conversation threads.
pub type ThreadId = String;

/// Unique identifier for thread messages. Unconfirmed local messages carry a
/// `temp-` prefixed id.
pub type MessageId = String;

// ── Action tags ─────────────────────────────────────────────────────

/// Generic wrapper action used when the transport multiplexes an application
/// event inside another envelope.
pub const ACTION_WRAPPER: &str = "event";
/// A new thread message.
pub const ACTION_NEW_MESSAGE: &str = "new_message";
/// Legacy spelling of [`ACTION_NEW_MESSAGE`].
pub const ACTION_MESSAGE: &str = "message";
/// A participant started typing.
pub const ACTION_TYPING_START: &str = "typing_start";
/// A participant stopped typing.
pub const ACTION_TYPING_STOP: &str = "typing_stop";
/// A member entered the lobby.
pub const ACTION_MEMBER_JOINED: &str = "member_joined";
/// A member left the lobby.
pub const ACTION_MEMBER_LEFT: &str = "member_left";
/// A member moved to another lobby cell.
pub const ACTION_POSITION_UPDATED: &str = "position_updated";

// ── Channel names ───────────────────────────────────────────────────

/// Well-known channel that aggregates events across all threads.
pub const GLOBAL_CHANNEL: &str = "global";

/// Channel name for a conversation thread.
pub fn thread_channel(thread_id: &str) -> String {
    format!("thread:{thread_id}")
}

/// Channel name for the presence broadcasts of a lobby thread.
pub fn lobby_channel(thread_id: &str) -> String {
    format!("lobby:{thread_id}")
}

// ── Domain types ────────────────────────────────────────────────────

/// A cell on the lobby grid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct GridPosition {
    pub col: u16,
    pub row: u16,
}

impl GridPosition {
    pub fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }
}

/// A user present in the lobby.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    /// `None` until the member has been placed on the grid.
    #[serde(default)]
    pub position: Option<GridPosition>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// The message a reply points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentMessage {
    pub message_id: MessageId,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub content: String,
}

/// A thread message in the normalized internal shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadMessage {
    pub message_id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message: Option<ParentMessage>,
    /// ISO 8601 timestamp. Empty for local messages the server has not
    /// confirmed yet.
    #[serde(default)]
    pub created_at: String,
}

/// The flat envelope shape this client publishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            action: action.into(),
            payload,
        }
    }
}

/// Payload of outbound typing events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingPayload {
    pub user_id: UserId,
    pub thread_id: ThreadId,
}

/// A presence broadcast received on a lobby channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    MemberJoined(Member),
    MemberLeft {
        user_id: UserId,
    },
    PositionUpdated {
        user_id: UserId,
        position: GridPosition,
    },
}

// ── Backend REST payloads ───────────────────────────────────────────

/// Response of `GET /lobby`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbySnapshot {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub members: Vec<Member>,
}

/// Response of `POST /lobby/join`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct JoinLobbyResponse {
    #[serde(default)]
    pub position: Option<GridPosition>,
}

/// One page of thread history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MessagesPage {
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

/// Response of `POST /threads/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
    pub created_at: String,
}

// ── Realtime frames ─────────────────────────────────────────────────

/// Frames sent from client to realtime server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authenticate the connection (MUST be first frame).
    Authenticate {
        #[serde(skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_version: Option<String>,
    },
    /// Start receiving messages published on a channel.
    Subscribe { channel: String },
    /// Stop receiving messages published on a channel.
    Unsubscribe { channel: String },
    /// Publish an envelope to every subscriber of a channel.
    Publish {
        channel: String,
        message: serde_json::Value,
    },
    /// Heartbeat.
    Ping,
}

/// Frames sent from realtime server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication accepted.
    Authenticated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
    },
    /// Subscription acknowledged.
    Subscribed { channel: String },
    /// Unsubscription acknowledged.
    Unsubscribed { channel: String },
    /// An envelope published on a subscribed channel.
    Message {
        channel: String,
        message: serde_json::Value,
    },
    /// Error, optionally scoped to one channel.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Heartbeat reply.
    Pong,
}
