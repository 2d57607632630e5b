//! Envelope normalization.
//!
//! The realtime transport delivers application events in one of two shapes:
//!
//! ```text
//! flat:    {"action": "new_message", "payload": {...}}
//! wrapped: {"action": "event", "payload": {"data": {"action": "new_message", "payload": {...}}}}
//! ```
//!
//! [`unwrap_envelope`] removes exactly one level of wrapping when the outer
//! action is the generic [`ACTION_WRAPPER`] tag. [`normalize`] and
//! [`normalize_lobby`] then turn the recovered action into typed values.
//! Everything here is pure; malformed input yields `Unknown`/`None`, never an
//! error.

use serde_json::Value;

use crate::protocol::{
    GridPosition, LobbyEvent, Member, ParentMessage, ThreadMessage, UserId, ACTION_MEMBER_JOINED,
    ACTION_MEMBER_LEFT, ACTION_MESSAGE, ACTION_NEW_MESSAGE, ACTION_POSITION_UPDATED,
    ACTION_TYPING_START, ACTION_TYPING_STOP, ACTION_WRAPPER,
};

/// A thread channel event recovered from a raw envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAction {
    NewMessage(ThreadMessage),
    TypingStart { user_id: UserId },
    TypingStop { user_id: UserId },
    /// Unrecognized action or a payload that failed its shape check.
    Unknown { action: Option<String> },
}

/// Recover the application-level `(action, payload)` pair from an envelope.
///
/// Returns `None` when no action name can be found. A missing payload is
/// reported as [`Value::Null`].
pub fn unwrap_envelope(raw: &Value) -> Option<(&str, &Value)> {
    let action = raw.get("action").and_then(Value::as_str)?;
    let payload = raw.get("payload").unwrap_or(&Value::Null);
    if action != ACTION_WRAPPER {
        return Some((action, payload));
    }

    let inner = payload.get("data").or_else(|| raw.get("data"))?;
    let inner_action = inner.get("action").and_then(Value::as_str)?;
    let inner_payload = inner.get("payload").unwrap_or(&Value::Null);
    Some((inner_action, inner_payload))
}

/// Normalize a thread channel envelope.
pub fn normalize(raw: &Value) -> ChannelAction {
    let Some((action, payload)) = unwrap_envelope(raw) else {
        return ChannelAction::Unknown { action: None };
    };

    let normalized = match action {
        ACTION_NEW_MESSAGE | ACTION_MESSAGE => {
            message_from_payload(payload).map(ChannelAction::NewMessage)
        }
        ACTION_TYPING_START => {
            id_field(payload, "user_id").map(|user_id| ChannelAction::TypingStart { user_id })
        }
        ACTION_TYPING_STOP => {
            id_field(payload, "user_id").map(|user_id| ChannelAction::TypingStop { user_id })
        }
        _ => None,
    };

    normalized.unwrap_or_else(|| ChannelAction::Unknown {
        action: Some(action.to_owned()),
    })
}

/// Normalize a lobby channel envelope. Returns `None` for anything that is not
/// a well-formed presence broadcast.
pub fn normalize_lobby(raw: &Value) -> Option<LobbyEvent> {
    let (action, payload) = unwrap_envelope(raw)?;
    match action {
        ACTION_MEMBER_JOINED => member_from_payload(payload).map(LobbyEvent::MemberJoined),
        ACTION_MEMBER_LEFT => {
            id_field(payload, "user_id").map(|user_id| LobbyEvent::MemberLeft { user_id })
        }
        ACTION_POSITION_UPDATED => {
            let user_id = id_field(payload, "user_id")?;
            let position = payload
                .get("position")
                .and_then(position_from_value)
                .or_else(|| position_from_value(payload))?;
            Some(LobbyEvent::PositionUpdated { user_id, position })
        }
        _ => None,
    }
}

/// Convert a message payload into a [`ThreadMessage`].
///
/// Requires `message_id` and `thread_id`. Sender details are read from the
/// flat `sender_*` fields, falling back to a nested `sender` object.
pub fn message_from_payload(payload: &Value) -> Option<ThreadMessage> {
    let message_id = id_field(payload, "message_id")?;
    let thread_id = id_field(payload, "thread_id")?;
    let sender = payload.get("sender").unwrap_or(&Value::Null);

    let sender_id = id_field(payload, "sender_id")
        .or_else(|| id_field(sender, "user_id"))
        .unwrap_or_default();
    let sender_username = str_field(payload, "sender_username")
        .or_else(|| str_field(sender, "username"))
        .unwrap_or_default();
    let sender_avatar =
        str_field(payload, "sender_avatar").or_else(|| str_field(sender, "avatar_url"));

    let parent_message = payload.get("parent_message").and_then(|parent| {
        Some(ParentMessage {
            message_id: id_field(parent, "message_id")?,
            sender_username: str_field(parent, "sender_username").unwrap_or_default(),
            content: str_field(parent, "content").unwrap_or_default(),
        })
    });

    Some(ThreadMessage {
        message_id,
        thread_id,
        sender_id,
        sender_username,
        sender_avatar,
        content: str_field(payload, "content").unwrap_or_default(),
        is_reply: payload
            .get("is_reply")
            .and_then(Value::as_bool)
            .unwrap_or(parent_message.is_some()),
        parent_message,
        created_at: str_field(payload, "created_at").unwrap_or_default(),
    })
}

fn member_from_payload(payload: &Value) -> Option<Member> {
    let user_id = id_field(payload, "user_id")?;
    Some(Member {
        user_id,
        position: payload.get("position").and_then(position_from_value),
        username: str_field(payload, "username").unwrap_or_default(),
        display_name: str_field(payload, "display_name"),
        avatar_url: str_field(payload, "avatar_url"),
    })
}

fn position_from_value(value: &Value) -> Option<GridPosition> {
    let col = value.get("col").and_then(Value::as_u64)?;
    let row = value.get("row").and_then(Value::as_u64)?;
    Some(GridPosition {
        col: u16::try_from(col).ok()?,
        row: u16::try_from(row).ok()?,
    })
}

/// Identifier fields arrive as strings or integers; empty strings count as
/// missing.
fn id_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}
