#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Atlantium client integration tests.
//!
//! Provides a channel-driven [`MockTransport`] with a [`MockServer`] half,
//! a scripted [`MockBackend`], and helpers for building server frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use atlantium_client::protocol::{
    ClientFrame, GridPosition, JoinLobbyResponse, LobbySnapshot, Member, MessagesPage,
    SendMessageResponse, ServerFrame,
};
use atlantium_client::{
    AtlantiumError, BackendApi, ConnectionState, RealtimeClient, RealtimeConfig, RealtimeEvent,
    RealtimeHandle, Transport,
};

/// Install a test subscriber so `RUST_LOG=debug cargo test` shows the
/// library's tracing output. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── MockTransport / MockServer ──────────────────────────────────────

/// Client half of an in-memory connection.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// Server half of an in-memory connection. Dropping it closes the
/// connection from the server side.
pub struct MockServer {
    incoming: mpsc::UnboundedSender<String>,
    outgoing: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

/// Create a connected transport/server pair.
pub fn mock_connection() -> (MockTransport, MockServer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            incoming: in_rx,
            outgoing: out_tx,
            closed: Arc::clone(&closed),
        },
        MockServer {
            incoming: in_tx,
            outgoing: out_rx,
            closed,
        },
    )
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), AtlantiumError> {
        self.outgoing
            .send(message)
            .map_err(|e| AtlantiumError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, AtlantiumError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), AtlantiumError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    pub fn push(&self, frame: &ServerFrame) {
        self.push_raw(serde_json::to_string(frame).unwrap());
    }

    pub fn push_raw(&self, text: impl Into<String>) {
        self.incoming.send(text.into()).unwrap();
    }

    /// Publish `envelope` on `channel`.
    pub fn deliver(&self, channel: &str, envelope: Value) {
        self.push(&ServerFrame::Message {
            channel: channel.into(),
            message: envelope,
        });
    }

    /// Next frame the client sent. Panics after one second of silence.
    pub async fn next_frame(&mut self) -> ClientFrame {
        let text = tokio::time::timeout(Duration::from_secs(1), self.outgoing.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped");
        serde_json::from_str(&text).unwrap()
    }

    /// Skip frames until a `subscribe` arrives and return its channel.
    pub async fn expect_subscribe(&mut self) -> String {
        loop {
            if let ClientFrame::Subscribe { channel } = self.next_frame().await {
                return channel;
            }
        }
    }

    /// Skip frames until a `publish` arrives.
    pub async fn expect_publish(&mut self) -> (String, Value) {
        loop {
            if let ClientFrame::Publish { channel, message } = self.next_frame().await {
                return (channel, message);
            }
        }
    }

    /// Every frame sent so far that has not been read yet.
    pub fn drain_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outgoing.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

/// Start a client over a mock connection.
pub fn start_client() -> (RealtimeClient, mpsc::Receiver<RealtimeEvent>, MockServer) {
    init_tracing();
    let (transport, server) = mock_connection();
    let (client, events) = RealtimeClient::start(
        transport,
        RealtimeConfig::new().with_access_token("test-token"),
    );
    (client, events, server)
}

/// Wait until the transport loop is running.
pub async fn wait_connected(handle: &RealtimeHandle) {
    let mut state = handle.watch_state();
    tokio::time::timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("timed out waiting for connection")
    .expect("state channel closed");
}

// ── Envelope helpers ────────────────────────────────────────────────

pub fn message_payload(message_id: &str, thread_id: &str, sender_id: &str, content: &str) -> Value {
    json!({
        "message_id": message_id,
        "thread_id": thread_id,
        "sender_id": sender_id,
        "sender_username": format!("{sender_id}-name"),
        "content": content,
        "created_at": "2024-05-01T10:00:00Z"
    })
}

pub fn new_message(payload: Value) -> Value {
    json!({ "action": "new_message", "payload": payload })
}

/// The same event wrapped in the generic `event` envelope.
pub fn wrapped(inner: Value) -> Value {
    json!({ "action": "event", "payload": { "data": inner } })
}

pub fn typing_start(user_id: &str, thread_id: &str) -> Value {
    json!({ "action": "typing_start", "payload": { "user_id": user_id, "thread_id": thread_id } })
}

pub fn typing_stop(user_id: &str, thread_id: &str) -> Value {
    json!({ "action": "typing_stop", "payload": { "user_id": user_id, "thread_id": thread_id } })
}

pub fn member(user_id: &str, position: Option<(u16, u16)>) -> Member {
    Member {
        user_id: user_id.into(),
        position: position.map(|(col, row)| GridPosition::new(col, row)),
        username: format!("{user_id}-name"),
        display_name: None,
        avatar_url: None,
    }
}

// ── MockBackend ─────────────────────────────────────────────────────

/// A backend call as recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    GetLobby,
    JoinLobby,
    LeaveLobby,
    MoveLobby { col: u16, row: u16 },
    GetThreadMessages { thread_id: String, page: u32, page_size: u32 },
    SendMessage { thread_id: String, content: String },
}

type Scripted<T> = StdMutex<VecDeque<Result<T, AtlantiumError>>>;

/// Scripted [`BackendApi`]. Each call pops the next scripted result for its
/// kind, falling back to a successful default.
#[derive(Default)]
pub struct MockBackend {
    calls: StdMutex<Vec<BackendCall>>,
    lobby: Scripted<LobbySnapshot>,
    join: Scripted<JoinLobbyResponse>,
    leave: Scripted<()>,
    moves: Scripted<()>,
    pages: Scripted<MessagesPage>,
    sends: Scripted<SendMessageResponse>,
    cancel_on_join: Option<Arc<AtomicBool>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lobby(self, result: Result<LobbySnapshot, AtlantiumError>) -> Self {
        self.lobby.lock().unwrap().push_back(result);
        self
    }

    pub fn with_join(self, result: Result<JoinLobbyResponse, AtlantiumError>) -> Self {
        self.join.lock().unwrap().push_back(result);
        self
    }

    pub fn with_leave(self, result: Result<(), AtlantiumError>) -> Self {
        self.leave.lock().unwrap().push_back(result);
        self
    }

    pub fn with_move(self, result: Result<(), AtlantiumError>) -> Self {
        self.moves.lock().unwrap().push_back(result);
        self
    }

    pub fn with_page(self, result: Result<MessagesPage, AtlantiumError>) -> Self {
        self.pages.lock().unwrap().push_back(result);
        self
    }

    pub fn with_send(self, result: Result<SendMessageResponse, AtlantiumError>) -> Self {
        self.sends.lock().unwrap().push_back(result);
        self
    }

    /// Set `flag` while `join_lobby` is in flight, as if the caller went away.
    pub fn cancel_on_join(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_on_join = Some(flag);
        self
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn next_or<T>(queue: &Scripted<T>, default: T) -> Result<T, AtlantiumError> {
    queue.lock().unwrap().pop_front().unwrap_or(Ok(default))
}

/// The error a backend returns for a refused request.
pub fn backend_error(status: u16, message: &str) -> AtlantiumError {
    AtlantiumError::Backend {
        status,
        message: message.into(),
        error_code: None,
    }
}

#[async_trait]
impl BackendApi for MockBackend {
    async fn get_lobby(&self) -> Result<LobbySnapshot, AtlantiumError> {
        self.record(BackendCall::GetLobby);
        next_or(
            &self.lobby,
            LobbySnapshot {
                thread_id: "lobby".into(),
                members: Vec::new(),
            },
        )
    }

    async fn join_lobby(&self) -> Result<JoinLobbyResponse, AtlantiumError> {
        self.record(BackendCall::JoinLobby);
        if let Some(flag) = &self.cancel_on_join {
            flag.store(true, Ordering::Release);
        }
        next_or(&self.join, JoinLobbyResponse::default())
    }

    async fn leave_lobby(&self) -> Result<(), AtlantiumError> {
        self.record(BackendCall::LeaveLobby);
        next_or(&self.leave, ())
    }

    async fn move_lobby(&self, col: u16, row: u16) -> Result<(), AtlantiumError> {
        self.record(BackendCall::MoveLobby { col, row });
        next_or(&self.moves, ())
    }

    async fn get_thread_messages(
        &self,
        thread_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<MessagesPage, AtlantiumError> {
        self.record(BackendCall::GetThreadMessages {
            thread_id: thread_id.into(),
            page,
            page_size,
        });
        next_or(&self.pages, MessagesPage::default())
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<SendMessageResponse, AtlantiumError> {
        self.record(BackendCall::SendMessage {
            thread_id: thread_id.into(),
            content: content.into(),
        });
        next_or(
            &self.sends,
            SendMessageResponse {
                message_id: "m-1".into(),
                created_at: "2024-05-01T10:00:00Z".into(),
            },
        )
    }
}
