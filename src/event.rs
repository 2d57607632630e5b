//! Events emitted by the realtime connection and by thread channel adapters.

use crate::error_codes::ErrorCode;
use crate::protocol::{ServerFrame, ThreadMessage, UserId};

/// Connection-level events delivered on the receiver returned by
/// [`RealtimeClient::start`](crate::realtime::RealtimeClient::start).
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// Synthetic event emitted when the transport loop starts.
    Connected,
    /// The server accepted the authentication frame.
    Authenticated { connection_id: Option<String> },
    /// The server acknowledged a channel subscription.
    Subscribed { channel: String },
    /// The server acknowledged a channel unsubscription.
    Unsubscribed { channel: String },
    /// The server reported an error. When `channel` is set, every local
    /// subscription to that channel has been closed.
    Error {
        channel: Option<String>,
        message: String,
        error_code: Option<ErrorCode>,
    },
    /// Heartbeat reply.
    Pong,
    /// The transport loop exited. Always the last event.
    Disconnected { reason: Option<String> },
}

impl RealtimeEvent {
    /// Convert a control frame into an event. Channel messages are routed to
    /// subscriptions instead and yield `None`.
    pub(crate) fn from_frame(frame: ServerFrame) -> Option<Self> {
        match frame {
            ServerFrame::Authenticated { connection_id } => {
                Some(Self::Authenticated { connection_id })
            }
            ServerFrame::Subscribed { channel } => Some(Self::Subscribed { channel }),
            ServerFrame::Unsubscribed { channel } => Some(Self::Unsubscribed { channel }),
            ServerFrame::Error {
                channel,
                message,
                error_code,
            } => Some(Self::Error {
                channel,
                message,
                error_code,
            }),
            ServerFrame::Pong => Some(Self::Pong),
            ServerFrame::Message { .. } => None,
        }
    }
}

/// Events yielded by [`ThreadChannel::next_event`](crate::thread::ThreadChannel::next_event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEvent {
    /// A message for the current thread arrived.
    MessageReceived(ThreadMessage),
    /// A participant started (or is still) typing.
    TypingStarted { user_id: UserId },
    /// A participant stopped typing, explicitly or by timeout.
    TypingStopped { user_id: UserId },
}
