//! Structured error codes shared by the realtime server and the backend API.
//!
//! Codes travel as `SCREAMING_SNAKE_CASE` strings, either in realtime `error`
//! frames or in the `code` field of a backend error body.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the realtime server or the backend.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    Unauthorized,
    InvalidToken,
    SubscriptionRequired,

    // Validation errors
    InvalidInput,
    MessageTooLarge,
    EmptyMessage,

    // Channel errors
    ChannelNotFound,
    ChannelForbidden,

    // Thread errors
    ThreadNotFound,
    NotAThreadMember,

    // Lobby errors
    NotInLobby,
    PositionOccupied,
    PositionOutOfBounds,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
    ServiceUnavailable,

    /// A code this client does not know yet.
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Access denied. Sign in again to continue.",
            Self::InvalidToken => {
                "The access token is invalid or has expired. Obtain a new session token."
            }
            Self::SubscriptionRequired => {
                "This feature requires an active membership. Upgrade to continue."
            }
            Self::InvalidInput => "The request was invalid or malformed.",
            Self::MessageTooLarge => "The message exceeds the maximum allowed size.",
            Self::EmptyMessage => "Messages cannot be empty.",
            Self::ChannelNotFound => "The requested realtime channel does not exist.",
            Self::ChannelForbidden => "You are not allowed to listen on this channel.",
            Self::ThreadNotFound => "The conversation could not be found.",
            Self::NotAThreadMember => "You are not a participant in this conversation.",
            Self::NotInLobby => "Join the lobby before moving around in it.",
            Self::PositionOccupied => "Someone is already standing on that spot.",
            Self::PositionOutOfBounds => "That spot is outside the lobby grid.",
            Self::RateLimitExceeded => "Too many requests. Slow down and try again shortly.",
            Self::InternalError => "The server hit an unexpected error. Please try again.",
            Self::ServiceUnavailable => {
                "The service is temporarily unavailable. Please try again later."
            }
            Self::Unknown => "The server reported an error this client does not recognize.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Match the wire representation so logs read the same as payloads.
        let wire = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{self:?}"));
        f.write_str(&wire)
    }
}
