//! Backend REST surface consumed by the lobby reconciler and the message log.
//!
//! [`BackendApi`] is the seam between client-side reconciliation and the
//! hosted backend. [`HttpBackend`](crate::backends::HttpBackend) talks to the
//! real service; tests script their own implementation.

use async_trait::async_trait;

use crate::error::AtlantiumError;
use crate::protocol::{JoinLobbyResponse, LobbySnapshot, MessagesPage, SendMessageResponse};

/// Backend calls the realtime core depends on.
///
/// Every method is a single request with no retry. Implementations map
/// transport failures and non-success responses to [`AtlantiumError`].
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Fetch the lobby thread id and its current roster.
    async fn get_lobby(&self) -> Result<LobbySnapshot, AtlantiumError>;

    /// Enter the lobby. The response carries the server-assigned position.
    async fn join_lobby(&self) -> Result<JoinLobbyResponse, AtlantiumError>;

    /// Leave the lobby.
    async fn leave_lobby(&self) -> Result<(), AtlantiumError>;

    /// Move the local user to `(col, row)`.
    async fn move_lobby(&self, col: u16, row: u16) -> Result<(), AtlantiumError>;

    /// Fetch one page of a thread's history. Pages are 1-based.
    async fn get_thread_messages(
        &self,
        thread_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<MessagesPage, AtlantiumError>;

    /// Post a message to a thread.
    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<SendMessageResponse, AtlantiumError>;
}
