//! Ephemeral typing-indicator state.
//!
//! [`TypingTracker`] keeps one deadline per typing user. A repeated start
//! overwrites the deadline instead of adding a second one, so a stale
//! deadline can never expire a user early. Expiry is observed by awaiting
//! [`TypingTracker::next_expiry`], which is cancel-safe and can sit inside
//! `tokio::select!`.

use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::UserId;

/// How long a typing indicator lives without a refresh.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct TypingEntry {
    user_id: UserId,
    deadline: Instant,
}

/// Tracks which users are typing and when each indicator expires.
///
/// Users are reported in the order they started typing.
#[derive(Debug)]
pub struct TypingTracker {
    timeout: Duration,
    entries: Vec<TypingEntry>,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Vec::new(),
        }
    }

    /// Mark `user_id` as typing and (re)start its expiry deadline.
    ///
    /// Returns `true` if the user was not typing before.
    pub fn start(&mut self, user_id: &str) -> bool {
        let deadline = Instant::now() + self.timeout;
        if let Some(entry) = self.entries.iter_mut().find(|e| e.user_id == user_id) {
            entry.deadline = deadline;
            return false;
        }
        self.entries.push(TypingEntry {
            user_id: user_id.to_owned(),
            deadline,
        });
        true
    }

    /// Remove `user_id` and cancel its deadline. Returns `true` if it was typing.
    pub fn stop(&mut self, user_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.user_id != user_id);
        self.entries.len() != before
    }

    /// Drop every indicator and every pending deadline.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }

    /// Users currently typing, in the order they started.
    pub fn typing_users(&self) -> Vec<UserId> {
        self.entries.iter().map(|e| e.user_id.clone()).collect()
    }

    /// Number of pending expiry deadlines. Always equal to the number of
    /// typing users.
    pub fn pending_deadlines(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The deadline at which `user_id` will expire, if it is typing.
    pub fn deadline(&self, user_id: &str) -> Option<Instant> {
        self.entries
            .iter()
            .find(|e| e.user_id == user_id)
            .map(|e| e.deadline)
    }

    /// Wait for the earliest deadline and remove that user.
    ///
    /// Never completes while nobody is typing.
    ///
    /// # Cancel Safety
    ///
    /// Cancel-safe: nothing is removed until the deadline has elapsed and the
    /// future is polled to completion.
    pub async fn next_expiry(&mut self) -> UserId {
        loop {
            let Some(earliest) = self.entries.iter().map(|e| e.deadline).min() else {
                return std::future::pending().await;
            };
            tokio::time::sleep_until(earliest).await;

            let now = Instant::now();
            if let Some(index) = self.entries.iter().position(|e| e.deadline <= now) {
                return self.entries.remove(index).user_id;
            }
        }
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn start_is_idempotent_for_membership() {
        let mut tracker = TypingTracker::default();
        assert!(tracker.start("u1"));
        assert!(!tracker.start("u1"));
        assert_eq!(tracker.typing_users(), vec!["u1".to_string()]);
    }

    #[test]
    fn stop_removes_user() {
        let mut tracker = TypingTracker::default();
        tracker.start("u1");
        tracker.start("u2");
        assert!(tracker.stop("u1"));
        assert!(!tracker.stop("u1"));
        assert_eq!(tracker.typing_users(), vec!["u2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_start_keeps_a_single_deadline() {
        let mut tracker = TypingTracker::default();
        for _ in 0..5 {
            tracker.start("u1");
            assert_eq!(tracker.pending_deadlines(), 1);
            tokio::time::advance(Duration::from_millis(500)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resets_rather_than_extends() {
        let mut tracker = TypingTracker::default();
        let origin = Instant::now();

        tracker.start("u1");
        tokio::time::advance(Duration::from_secs(1)).await;
        tracker.start("u1");

        assert_eq!(
            tracker.deadline("u1"),
            Some(origin + Duration::from_secs(1) + DEFAULT_TYPING_TIMEOUT)
        );

        // 3.5s after the first start the first deadline would have passed.
        let early = tokio::time::timeout_at(
            origin + Duration::from_millis(3500),
            tracker.next_expiry(),
        )
        .await;
        assert!(early.is_err(), "expired from a stale deadline");
        assert!(tracker.is_typing("u1"));

        let expired = tracker.next_expiry().await;
        assert_eq!(expired, "u1");
        assert_eq!(Instant::now(), origin + Duration::from_secs(4));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiries_arrive_in_deadline_order() {
        let mut tracker = TypingTracker::new(Duration::from_secs(2));
        tracker.start("a");
        tokio::time::advance(Duration::from_millis(500)).await;
        tracker.start("b");
        tokio::time::advance(Duration::from_millis(500)).await;
        tracker.start("a");

        assert_eq!(tracker.next_expiry().await, "b");
        assert_eq!(tracker.next_expiry().await, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_pending_expiry() {
        let mut tracker = TypingTracker::default();
        tracker.start("u1");
        tracker.clear();
        let result = tokio::time::timeout(Duration::from_secs(10), tracker.next_expiry()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_loses_nothing() {
        let mut tracker = TypingTracker::default();
        tracker.start("u1");
        let _ = tokio::time::timeout(Duration::from_secs(1), tracker.next_expiry()).await;
        assert!(tracker.is_typing("u1"));
        assert_eq!(tracker.next_expiry().await, "u1");
    }
}
