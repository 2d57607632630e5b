//! Thread channel adapter.
//!
//! [`ThreadChannel`] binds one thread's realtime channel on a shared
//! connection and turns its raw envelopes into [`ThreadEvent`]s. It owns the
//! typing indicators for that thread: each `typing_start` (re)arms a
//! per-user deadline, and an indicator that is not refreshed in time is
//! reported as stopped.
//!
//! The adapter is driven by [`next_event`](ThreadChannel::next_event). Switching
//! threads or unsubscribing drops the channel binding together with every
//! pending typing deadline, so an abandoned thread never produces events.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut channel = ThreadChannel::new(client.handle(), ThreadChannelConfig::new("u1"));
//! channel.subscribe("t1");
//! while let Some(event) = channel.next_event().await {
//!     match event {
//!         ThreadEvent::MessageReceived(msg) => {
//!             println!("{}: {}", msg.sender_username, msg.content)
//!         }
//!         ThreadEvent::TypingStarted { user_id } => println!("{user_id} is typing"),
//!         ThreadEvent::TypingStopped { user_id } => println!("{user_id} stopped"),
//!     }
//! }
//! ```

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{AtlantiumError, Result};
use crate::event::ThreadEvent;
use crate::normalize::{normalize, ChannelAction};
use crate::protocol::{
    thread_channel, Envelope, ThreadId, ThreadMessage, TypingPayload, UserId, ACTION_NEW_MESSAGE,
    ACTION_TYPING_START, ACTION_TYPING_STOP,
};
use crate::realtime::{ChannelSubscription, ConnectionState, RealtimeHandle};
use crate::typing::{TypingTracker, DEFAULT_TYPING_TIMEOUT};

/// Configuration for a [`ThreadChannel`].
#[derive(Debug, Clone)]
pub struct ThreadChannelConfig {
    /// The local user. Typing events from this user are ignored and
    /// outbound typing events carry this id.
    pub user_id: UserId,
    /// How long a typing indicator lives without a refresh.
    pub typing_timeout: Duration,
}

impl ThreadChannelConfig {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }
}

/// Adapter for one thread's realtime channel.
///
/// Dropping the adapter drops its channel binding and typing state.
#[derive(Debug)]
pub struct ThreadChannel {
    user_id: UserId,
    realtime: RealtimeHandle,
    state_rx: watch::Receiver<ConnectionState>,
    thread_id: Option<ThreadId>,
    binding: Option<ChannelSubscription>,
    bind_attempted: bool,
    typing: TypingTracker,
}

impl ThreadChannel {
    pub fn new(realtime: RealtimeHandle, config: ThreadChannelConfig) -> Self {
        Self {
            user_id: config.user_id,
            state_rx: realtime.watch_state(),
            realtime,
            thread_id: None,
            binding: None,
            bind_attempted: false,
            typing: TypingTracker::new(config.typing_timeout),
        }
    }

    /// The thread this adapter follows, bound or not.
    pub fn current_thread(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Whether a channel subscription is live.
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Users currently typing, in the order they started.
    pub fn typing_users(&self) -> Vec<UserId> {
        self.typing.typing_users()
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.typing.is_typing(user_id)
    }

    // ── Binding ─────────────────────────────────────────────────────

    /// Follow `thread_id`.
    ///
    /// Calling again with the current thread does nothing. A different thread
    /// tears the previous binding down first. When the connection is not
    /// established yet the channel is bound as soon as it is.
    pub fn subscribe(&mut self, thread_id: &str) {
        if self.thread_id.as_deref() == Some(thread_id) {
            return;
        }
        self.teardown();
        self.thread_id = Some(thread_id.to_owned());
        self.try_bind();
    }

    /// Stop following the current thread.
    pub fn unsubscribe(&mut self) {
        self.teardown();
        self.thread_id = None;
    }

    fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            debug!(channel = binding.channel(), "thread channel unbound");
        }
        self.typing.clear();
        self.bind_attempted = false;
    }

    fn try_bind(&mut self) {
        let Some(thread_id) = &self.thread_id else {
            return;
        };
        if *self.state_rx.borrow() != ConnectionState::Connected {
            debug!(thread_id = %thread_id, "connection not ready, binding deferred");
            return;
        }

        self.bind_attempted = true;
        match self.realtime.subscribe(&thread_channel(thread_id)) {
            Ok(subscription) => {
                debug!(channel = subscription.channel(), "thread channel bound");
                self.binding = Some(subscription);
            }
            Err(e) => {
                warn!(thread_id = %thread_id, "thread channel subscribe failed: {e}");
            }
        }
    }

    fn on_state_change(&mut self) {
        let state = *self.state_rx.borrow_and_update();
        debug!(?state, "connection state changed");
        if state == ConnectionState::Connected && self.binding.is_none() && !self.bind_attempted {
            self.try_bind();
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Wait for the next event on the current thread.
    ///
    /// Returns `None` once the connection is gone and no typing indicator is
    /// left to expire.
    ///
    /// # Cancel Safety
    ///
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<ThreadEvent> {
        loop {
            let connection_gone = *self.state_rx.borrow() == ConnectionState::Disconnected;
            if connection_gone && self.binding.is_none() && self.typing.is_empty() {
                return None;
            }

            tokio::select! {
                raw = recv_bound(&mut self.binding) => match raw {
                    Some(raw) => {
                        if let Some(event) = self.handle_envelope(&raw) {
                            return Some(event);
                        }
                    }
                    None => {
                        warn!(thread_id = ?self.thread_id, "thread subscription ended");
                        self.binding = None;
                    }
                },
                user_id = self.typing.next_expiry() => {
                    debug!(user_id = %user_id, "typing indicator expired");
                    return Some(ThreadEvent::TypingStopped { user_id });
                }
                changed = self.state_rx.changed(), if !connection_gone => {
                    if changed.is_ok() {
                        self.on_state_change();
                    }
                }
            }
        }
    }

    fn handle_envelope(&mut self, raw: &Value) -> Option<ThreadEvent> {
        match normalize(raw) {
            ChannelAction::NewMessage(message) => {
                if self.thread_id.as_deref() != Some(message.thread_id.as_str()) {
                    debug!(message_id = %message.message_id, "message for another thread dropped");
                    return None;
                }
                Some(ThreadEvent::MessageReceived(message))
            }
            ChannelAction::TypingStart { user_id } => {
                if user_id == self.user_id {
                    return None;
                }
                self.typing.start(&user_id);
                Some(ThreadEvent::TypingStarted { user_id })
            }
            ChannelAction::TypingStop { user_id } => {
                if user_id == self.user_id {
                    return None;
                }
                self.typing
                    .stop(&user_id)
                    .then_some(ThreadEvent::TypingStopped { user_id })
            }
            ChannelAction::Unknown { action } => {
                debug!(?action, "ignoring thread envelope");
                None
            }
        }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Tell the thread the local user started typing. Does nothing while
    /// unbound; failures are logged.
    pub fn send_typing_start(&self) {
        self.publish_typing(ACTION_TYPING_START);
    }

    /// Tell the thread the local user stopped typing. Does nothing while
    /// unbound; failures are logged.
    pub fn send_typing_stop(&self) {
        self.publish_typing(ACTION_TYPING_STOP);
    }

    fn publish_typing(&self, action: &str) {
        let (Some(thread_id), Some(_)) = (&self.thread_id, &self.binding) else {
            debug!(action, "typing event skipped, channel not bound");
            return;
        };
        let payload = TypingPayload {
            user_id: self.user_id.clone(),
            thread_id: thread_id.clone(),
        };
        let result = serde_json::to_value(payload)
            .map_err(AtlantiumError::from)
            .and_then(|payload| {
                self.realtime
                    .publish(&thread_channel(thread_id), &Envelope::new(action, payload))
            });
        if let Err(e) = result {
            warn!(action, thread_id = %thread_id, "typing publish failed: {e}");
        }
    }

    /// Publish a message on the bound channel.
    ///
    /// # Errors
    ///
    /// [`AtlantiumError::NotSubscribed`] while unbound, otherwise any
    /// [`RealtimeHandle::publish`] error.
    pub fn broadcast_message(&self, message: &ThreadMessage) -> Result<()> {
        let (Some(thread_id), Some(_)) = (&self.thread_id, &self.binding) else {
            return Err(AtlantiumError::NotSubscribed);
        };
        let envelope = Envelope::new(ACTION_NEW_MESSAGE, serde_json::to_value(message)?);
        self.realtime.publish(&thread_channel(thread_id), &envelope)
    }
}

async fn recv_bound(binding: &mut Option<ChannelSubscription>) -> Option<Value> {
    match binding {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_to_three_second_typing_timeout() {
        let config = ThreadChannelConfig::new("u1");
        assert_eq!(config.user_id, "u1");
        assert_eq!(config.typing_timeout, Duration::from_secs(3));

        let config = config.with_typing_timeout(Duration::from_millis(500));
        assert_eq!(config.typing_timeout, Duration::from_millis(500));
    }
}
