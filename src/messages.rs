//! Per-thread message history with optimistic sends.
//!
//! A sent message appears immediately under a temporary `temp-<uuid>` id and
//! is swapped for the server id once the backend confirms it. Inbound
//! messages are de-duplicated by id, and the local user's own messages
//! arriving over the realtime channel are skipped because the send flow
//! already owns them.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::api::BackendApi;
use crate::error::Result;
use crate::protocol::{
    MessageId, MessagesPage, SendMessageResponse, ThreadId, ThreadMessage, UserId,
};

/// Prefix of ids assigned to unconfirmed local messages.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// Ordered message history for one thread.
#[derive(Debug)]
pub struct MessageLog {
    thread_id: ThreadId,
    user_id: UserId,
    username: String,
    avatar_url: Option<String>,
    entries: Vec<ThreadMessage>,
    pending: HashSet<MessageId>,
}

impl MessageLog {
    pub fn new(
        thread_id: impl Into<ThreadId>,
        user_id: impl Into<UserId>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id: user_id.into(),
            username: username.into(),
            avatar_url: None,
            entries: Vec::new(),
            pending: HashSet::new(),
        }
    }

    /// Avatar attached to optimistic messages.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn messages(&self) -> &[ThreadMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.entries.iter().any(|m| m.message_id == message_id)
    }

    /// Whether `message_id` is a local message awaiting confirmation.
    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Optimistic sends ────────────────────────────────────────────

    /// Append a local message under a fresh temporary id and return that id.
    pub fn push_optimistic(&mut self, content: impl Into<String>) -> MessageId {
        let temp_id = format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4());
        self.entries.push(ThreadMessage {
            message_id: temp_id.clone(),
            thread_id: self.thread_id.clone(),
            sender_id: self.user_id.clone(),
            sender_username: self.username.clone(),
            sender_avatar: self.avatar_url.clone(),
            content: content.into(),
            is_reply: false,
            parent_message: None,
            created_at: String::new(),
        });
        self.pending.insert(temp_id.clone());
        temp_id
    }

    /// Swap a temporary id for the confirmed server id.
    ///
    /// If the server id is already in the log (a history page raced the
    /// confirmation) the stub is removed instead, so exactly one entry
    /// survives. Returns `false` when `temp_id` is not pending.
    pub fn confirm(&mut self, temp_id: &str, confirmed: SendMessageResponse) -> bool {
        if !self.pending.remove(temp_id) {
            debug!(temp_id, "confirm for unknown optimistic message");
            return false;
        }

        if self.contains(&confirmed.message_id) {
            self.entries.retain(|m| m.message_id != temp_id);
            debug!(
                temp_id,
                message_id = %confirmed.message_id,
                "confirmed message already present, dropped stub"
            );
            return true;
        }

        if let Some(entry) = self.entries.iter_mut().find(|m| m.message_id == temp_id) {
            entry.message_id = confirmed.message_id;
            entry.created_at = confirmed.created_at;
        }
        true
    }

    /// Remove an optimistic message whose send failed. Returns `false` when
    /// `temp_id` is not pending.
    pub fn discard(&mut self, temp_id: &str) -> bool {
        if !self.pending.remove(temp_id) {
            return false;
        }
        self.entries.retain(|m| m.message_id != temp_id);
        true
    }

    /// Send `content`: optimistic append, backend call, then confirm or
    /// discard. Returns the server id.
    ///
    /// # Errors
    ///
    /// Returns the backend error after the optimistic entry was removed.
    pub async fn send<B>(&mut self, api: &B, content: &str) -> Result<MessageId>
    where
        B: BackendApi + ?Sized,
    {
        let temp_id = self.push_optimistic(content);
        match api.send_message(&self.thread_id, content).await {
            Ok(confirmed) => {
                let message_id = confirmed.message_id.clone();
                self.confirm(&temp_id, confirmed);
                Ok(message_id)
            }
            Err(e) => {
                warn!(thread_id = %self.thread_id, "send message failed: {e}");
                self.discard(&temp_id);
                Err(e)
            }
        }
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Append a message received over the realtime channel.
    ///
    /// Returns `false` when it belongs to another thread, was sent by the
    /// local user, or is already known.
    pub fn apply_remote(&mut self, message: ThreadMessage) -> bool {
        if message.thread_id != self.thread_id {
            debug!(message_id = %message.message_id, "message for another thread dropped");
            return false;
        }
        if message.sender_id == self.user_id {
            return false;
        }
        if self.contains(&message.message_id) {
            debug!(message_id = %message.message_id, "duplicate message dropped");
            return false;
        }
        self.entries.push(message);
        true
    }

    /// Merge a fetched history page. Unknown ids are inserted, confirmed
    /// messages are ordered by `created_at` and pending stubs stay last.
    /// Returns the number of inserted messages.
    pub fn merge_history(&mut self, page: MessagesPage) -> usize {
        let mut inserted = 0;
        for message in page.messages {
            if message.thread_id != self.thread_id || self.contains(&message.message_id) {
                continue;
            }
            self.entries.push(message);
            inserted += 1;
        }

        let pending = &self.pending;
        self.entries.sort_by(|a, b| {
            let a_pending = pending.contains(&a.message_id);
            let b_pending = pending.contains(&b.message_id);
            match (a_pending, b_pending) {
                (false, false) => a.created_at.cmp(&b.created_at),
                (true, true) => Ordering::Equal,
                (a_pending, _) => a_pending.cmp(&b_pending),
            }
        });
        inserted
    }

    /// Fetch one history page and merge it.
    ///
    /// # Errors
    ///
    /// Propagates the backend error; the log is unchanged then.
    pub async fn load_page<B>(&mut self, api: &B, page: u32, page_size: u32) -> Result<usize>
    where
        B: BackendApi + ?Sized,
    {
        let fetched = api
            .get_thread_messages(&self.thread_id, page, page_size)
            .await?;
        let inserted = self.merge_history(fetched);
        debug!(thread_id = %self.thread_id, page, inserted, "history page merged");
        Ok(inserted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn remote(id: &str, sender: &str, created_at: &str) -> ThreadMessage {
        ThreadMessage {
            message_id: id.into(),
            thread_id: "t1".into(),
            sender_id: sender.into(),
            sender_username: sender.into(),
            sender_avatar: None,
            content: format!("body of {id}"),
            is_reply: false,
            parent_message: None,
            created_at: created_at.into(),
        }
    }

    fn log() -> MessageLog {
        MessageLog::new("t1", "me", "Me")
    }

    #[test]
    fn optimistic_message_confirms_to_single_entry() {
        let mut log = log();
        let temp = log.push_optimistic("hi");
        assert!(temp.starts_with(TEMP_ID_PREFIX));
        assert!(log.is_pending(&temp));
        assert_eq!(log.messages()[0].created_at, "");

        assert!(log.confirm(
            &temp,
            SendMessageResponse {
                message_id: "m-999".into(),
                created_at: "2024-05-01T10:00:00Z".into(),
            }
        ));

        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].message_id, "m-999");
        assert_eq!(log.messages()[0].content, "hi");
        assert!(!log.is_pending(&temp));
        assert!(!log.contains(&temp));
    }

    #[test]
    fn confirm_after_history_already_has_server_id_keeps_one() {
        let mut log = log();
        let temp = log.push_optimistic("hi");
        let mut echoed = remote("m-999", "me", "2024-05-01T10:00:00Z");
        echoed.content = "hi".into();
        log.merge_history(MessagesPage {
            messages: vec![echoed],
        });
        assert_eq!(log.len(), 2);

        log.confirm(
            &temp,
            SendMessageResponse {
                message_id: "m-999".into(),
                created_at: "2024-05-01T10:00:00Z".into(),
            },
        );
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].message_id, "m-999");
    }

    #[test]
    fn confirm_twice_is_rejected() {
        let mut log = log();
        let temp = log.push_optimistic("hi");
        let ok = SendMessageResponse {
            message_id: "m-1".into(),
            created_at: "t".into(),
        };
        assert!(log.confirm(&temp, ok.clone()));
        assert!(!log.confirm(&temp, ok));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn discard_removes_stub() {
        let mut log = log();
        let temp = log.push_optimistic("oops");
        assert!(log.discard(&temp));
        assert!(log.is_empty());
        assert!(!log.discard(&temp));
    }

    #[test]
    fn remote_messages_are_deduplicated_and_filtered() {
        let mut log = log();
        assert!(log.apply_remote(remote("m-1", "u2", "a")));
        assert!(!log.apply_remote(remote("m-1", "u2", "a")));
        assert!(!log.apply_remote(remote("m-2", "me", "b")));

        let mut elsewhere = remote("m-3", "u2", "c");
        elsewhere.thread_id = "t2".into();
        assert!(!log.apply_remote(elsewhere));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn history_merge_orders_by_timestamp_with_pending_last() {
        let mut log = log();
        log.apply_remote(remote("m-3", "u2", "2024-01-03"));
        let temp = log.push_optimistic("draft");

        let inserted = log.merge_history(MessagesPage {
            messages: vec![
                remote("m-1", "u2", "2024-01-01"),
                remote("m-3", "u2", "2024-01-03"),
                remote("m-2", "u3", "2024-01-02"),
            ],
        });

        assert_eq!(inserted, 2);
        let ids: Vec<_> = log.messages().iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m-1", "m-2", "m-3", temp.as_str()]);
    }
}
