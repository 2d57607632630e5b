//! Shared realtime connection.
//!
//! [`RealtimeClient`] owns a background transport loop that multiplexes any
//! number of named channel subscriptions over one physical connection.
//! Adapters never own the connection: they hold a cheap [`RealtimeHandle`]
//! and register [`ChannelSubscription`]s through it. Dropping a subscription
//! unregisters it; the loop unsubscribes from the server once the last local
//! listener of a channel is gone.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect("wss://rt.atlantium.app/ws").await?;
//! let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());
//!
//! let handle = client.handle();
//! let mut sub = handle.subscribe(&thread_channel("t1"))?;
//! while let Some(envelope) = sub.recv().await {
//!     println!("{envelope}");
//! }
//! client.shutdown().await;
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::error::{AtlantiumError, Result};
use crate::event::RealtimeEvent;
use crate::normalize::unwrap_envelope;
use crate::protocol::{ClientFrame, Envelope, ServerFrame, GLOBAL_CHANNEL};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RealtimeClient`] connection.
///
/// # Example
///
/// ```
/// use atlantium_client::realtime::RealtimeConfig;
/// use std::time::Duration;
///
/// let config = RealtimeConfig::new()
///     .with_access_token("session-token")
///     .with_event_channel_capacity(64)
///     .with_shutdown_timeout(Duration::from_secs(2));
/// assert_eq!(config.event_channel_capacity, 64);
/// assert!(config.client_version.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Session token sent in the authentication frame.
    pub access_token: Option<String>,
    /// Client version sent in the authentication frame.
    /// Defaults to the crate version at compile time.
    pub client_version: Option<String>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning.
    /// `Disconnected` is always delivered. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// How long [`RealtimeClient::shutdown`] waits for the loop to close the
    /// transport before aborting it. Zero aborts immediately.
    pub shutdown_timeout: Duration,
}

impl RealtimeConfig {
    pub fn new() -> Self {
        Self {
            access_token: None,
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Lifecycle of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The transport loop has not started yet.
    Connecting,
    /// The transport loop is running; subscriptions may be registered.
    Connected,
    /// The transport loop exited. Terminal for this client.
    Disconnected,
}

/// Commands from handles to the transport loop.
#[derive(Debug)]
enum Command {
    Send(ClientFrame),
    Subscribe {
        channel: String,
        id: u64,
        sink: mpsc::UnboundedSender<Value>,
    },
    Unsubscribe {
        channel: String,
        id: u64,
    },
}

struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    authenticated: AtomicBool,
    next_subscription_id: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
        if state == ConnectionState::Disconnected {
            self.authenticated.store(false, Ordering::Release);
        }
    }
}

// ── Handle ──────────────────────────────────────────────────────────

/// Cloneable reference to a shared realtime connection.
///
/// Handles do not keep the connection alive: once the owning
/// [`RealtimeClient`] shuts down, every operation fails with
/// [`AtlantiumError::NotConnected`].
#[derive(Clone)]
pub struct RealtimeHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl RealtimeHandle {
    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns `true` if the server has accepted authentication.
    pub fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::Acquire)
    }

    /// Receiver that observes every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to every envelope published on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::NotConnected`] unless the connection is
    /// [`Connected`](ConnectionState::Connected).
    pub fn subscribe(&self, channel: &str) -> Result<ChannelSubscription> {
        self.register(channel, None)
    }

    /// Subscribe to envelopes on `channel` whose (unwrapped) action equals
    /// `action`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::NotConnected`] unless the connection is
    /// [`Connected`](ConnectionState::Connected).
    pub fn subscribe_action(&self, channel: &str, action: &str) -> Result<ChannelSubscription> {
        self.register(channel, Some(action.to_owned()))
    }

    /// Subscribe to the well-known cross-thread channel.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::NotConnected`] unless the connection is
    /// [`Connected`](ConnectionState::Connected).
    pub fn subscribe_global(&self) -> Result<ChannelSubscription> {
        self.register(GLOBAL_CHANNEL, None)
    }

    /// Publish an envelope on `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::NotConnected`] if the connection is not
    /// established, or [`AtlantiumError::Serialization`] if the envelope
    /// cannot be encoded.
    pub fn publish(&self, channel: &str, envelope: &Envelope) -> Result<()> {
        let message = serde_json::to_value(envelope)?;
        self.send(Command::Send(ClientFrame::Publish {
            channel: channel.to_owned(),
            message,
        }))
    }

    /// Send a heartbeat ping.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::NotConnected`] if the connection is not
    /// established.
    pub fn ping(&self) -> Result<()> {
        self.send(Command::Send(ClientFrame::Ping))
    }

    fn register(
        &self,
        channel: &str,
        action_filter: Option<String>,
    ) -> Result<ChannelSubscription> {
        let id = self
            .shared
            .next_subscription_id
            .fetch_add(1, Ordering::Relaxed);
        let (sink, rx) = mpsc::unbounded_channel();
        self.send(Command::Subscribe {
            channel: channel.to_owned(),
            id,
            sink,
        })?;
        debug!(channel, id, "channel subscription registered");
        Ok(ChannelSubscription {
            channel: channel.to_owned(),
            id,
            action_filter,
            rx,
            cmd_tx: self.cmd_tx.clone(),
        })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(AtlantiumError::NotConnected);
        }
        self.cmd_tx
            .send(cmd)
            .map_err(|_| AtlantiumError::NotConnected)
    }
}

impl std::fmt::Debug for RealtimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHandle")
            .field("state", &self.state())
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

// ── Subscription ────────────────────────────────────────────────────

/// A local listener on one channel. Unregisters itself on drop.
#[derive(Debug)]
pub struct ChannelSubscription {
    channel: String,
    id: u64,
    action_filter: Option<String>,
    rx: mpsc::UnboundedReceiver<Value>,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ChannelSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receive the next envelope.
    ///
    /// Returns `None` once the subscription has ended: the server rejected
    /// the channel or the connection closed.
    ///
    /// # Cancel Safety
    ///
    /// Cancel-safe; no envelope is lost if the future is dropped.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let envelope = self.rx.recv().await?;
            match &self.action_filter {
                None => return Some(envelope),
                Some(filter) => {
                    if unwrap_envelope(&envelope).is_some_and(|(action, _)| action == filter) {
                        return Some(envelope);
                    }
                }
            }
        }
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        // The loop may already be gone; nothing to unregister then.
        let _ = self.cmd_tx.send(Command::Unsubscribe {
            channel: std::mem::take(&mut self.channel),
            id: self.id,
        });
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Owner of a realtime connection.
///
/// Created via [`RealtimeClient::start`], which spawns the background
/// transport loop and returns this owner together with an event receiver.
pub struct RealtimeClient {
    handle: RealtimeHandle,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RealtimeClient {
    /// Start the transport loop over an already-connected transport.
    ///
    /// The loop sends an [`Authenticate`](ClientFrame::Authenticate) frame
    /// before anything else.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        config: RealtimeConfig,
    ) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<RealtimeEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            state_tx,
            authenticated: AtomicBool::new(false),
            next_subscription_id: AtomicU64::new(1),
        });

        // Queued ahead of any handle command, so it is the first frame out.
        let _ = cmd_tx.send(Command::Send(ClientFrame::Authenticate {
            access_token: config.access_token,
            client_version: config.client_version,
        }));

        let task = tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            event_tx,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        let client = Self {
            handle: RealtimeHandle { cmd_tx, shared },
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    /// A handle for adapters that share this connection.
    pub fn handle(&self) -> RealtimeHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Close the transport and stop the background task.
    pub async fn shutdown(&mut self) {
        debug!("RealtimeClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Abort the loop if it does not exit in time so it cannot detach.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.handle.shared.set_state(ConnectionState::Disconnected);
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("state", &self.state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        // No executor to drive a graceful close here; abort the loop instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.handle.shared.set_state(ConnectionState::Disconnected);
    }
}

// ── Transport loop ──────────────────────────────────────────────────

struct Listener {
    id: u64,
    sink: mpsc::UnboundedSender<Value>,
}

/// Local listeners keyed by channel name.
#[derive(Default)]
struct Registry {
    channels: HashMap<String, Vec<Listener>>,
}

impl Registry {
    /// Returns `true` if this is the first listener on the channel.
    fn add(&mut self, channel: String, listener: Listener) -> bool {
        let listeners = self.channels.entry(channel).or_default();
        listeners.push(listener);
        listeners.len() == 1
    }

    /// Returns `true` if the channel has no listeners left.
    fn remove(&mut self, channel: &str, id: u64) -> bool {
        let Some(listeners) = self.channels.get_mut(channel) else {
            return false;
        };
        listeners.retain(|l| l.id != id);
        if listeners.is_empty() {
            self.channels.remove(channel);
            return true;
        }
        false
    }

    /// Close every listener on `channel`.
    fn close(&mut self, channel: &str) -> usize {
        self.channels.remove(channel).map_or(0, |l| l.len())
    }

    /// Deliver an envelope, pruning listeners whose receiver is gone.
    fn dispatch(&mut self, channel: &str, message: &Value) -> usize {
        let Some(listeners) = self.channels.get_mut(channel) else {
            return 0;
        };
        listeners.retain(|l| l.sink.send(message.clone()).is_ok());
        listeners.len()
    }
}

/// Background loop that multiplexes commands and inbound frames via
/// `tokio::select!`.
///
/// Exits when:
/// - The command channel closes (every handle and the client dropped)
/// - The shutdown signal fires
/// - The transport returns `None` or an error
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    shared: Arc<Shared>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) {
    debug!("transport loop started");
    shared.set_state(ConnectionState::Connected);
    emit_event(&event_tx, RealtimeEvent::Connected).await;

    let mut registry = Registry::default();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    debug!("command channel closed, shutting down transport loop");
                    let _ = transport.close().await;
                    emit_disconnected(&event_tx, &shared, Some("client shut down".into())).await;
                    break;
                };
                let frame = match cmd {
                    Command::Send(frame) => Some(frame),
                    Command::Subscribe { channel, id, sink } => {
                        let first = registry.add(channel.clone(), Listener { id, sink });
                        first.then_some(ClientFrame::Subscribe { channel })
                    }
                    Command::Unsubscribe { channel, id } => {
                        let last = registry.remove(&channel, id);
                        last.then_some(ClientFrame::Unsubscribe { channel })
                    }
                };
                let Some(frame) = frame else { continue };
                if let Err(e) = send_frame(&mut transport, &frame).await {
                    error!("transport send error: {e}");
                    emit_disconnected(
                        &event_tx,
                        &shared,
                        Some(format!("transport send error: {e}")),
                    ).await;
                    break;
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &shared, Some("client shut down".into())).await;
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => handle_frame(frame, &mut registry, &event_tx, &shared).await,
                        Err(e) => warn!("failed to deserialize server frame: {e}; raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        emit_disconnected(
                            &event_tx,
                            &shared,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    None => {
                        debug!("transport closed by server");
                        emit_disconnected(&event_tx, &shared, None).await;
                        break;
                    }
                }
            }
        }
    }

    // Dropping the registry closes every subscription receiver.
    drop(registry);
    debug!("transport loop exited");
}

async fn send_frame(transport: &mut impl Transport, frame: &ClientFrame) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    transport.send(json).await
}

async fn handle_frame(
    frame: ServerFrame,
    registry: &mut Registry,
    event_tx: &mpsc::Sender<RealtimeEvent>,
    shared: &Shared,
) {
    match &frame {
        ServerFrame::Message { channel, message } => {
            let delivered = registry.dispatch(channel, message);
            if delivered == 0 {
                debug!(channel = %channel, "message for channel without listeners");
            }
            return;
        }
        ServerFrame::Authenticated { .. } => {
            shared.authenticated.store(true, Ordering::Release);
            debug!("state: authenticated");
        }
        ServerFrame::Error {
            channel: Some(channel),
            message,
            ..
        } => {
            let closed = registry.close(channel);
            warn!(channel = %channel, closed, "channel error: {message}");
        }
        ServerFrame::Error {
            channel: None,
            message,
            ..
        } => {
            warn!("server error: {message}");
        }
        _ => {}
    }

    if let Some(event) = RealtimeEvent::from_frame(frame) {
        emit_event(event_tx, event).await;
    }
}

/// Emit an event, dropping it with a warning if the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<RealtimeEvent>, event: RealtimeEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`Disconnected`](RealtimeEvent::Disconnected) and update state.
///
/// Uses `send().await` because `Disconnected` is always the last event and
/// must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<RealtimeEvent>,
    shared: &Shared,
    reason: Option<String>,
) {
    shared.set_state(ConnectionState::Disconnected);
    let event = RealtimeEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Records sent frames and replays scripted responses.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, AtlantiumError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, AtlantiumError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (transport, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> std::result::Result<(), AtlantiumError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, AtlantiumError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), AtlantiumError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sent_frames(sent: &StdMutex<Vec<String>>) -> Vec<ClientFrame> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn start_sends_authenticate_first() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let config = RealtimeConfig::new().with_access_token("tok");
        let (mut client, mut events) = RealtimeClient::start(transport, config);

        assert!(matches!(events.recv().await, Some(RealtimeEvent::Connected)));
        settle().await;

        let frames = sent_frames(&sent);
        match &frames[0] {
            ClientFrame::Authenticate { access_token, .. } => {
                assert_eq!(access_token.as_deref(), Some("tok"));
            }
            other => panic!("expected Authenticate, got {other:?}"),
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_before_loop_starts_is_rejected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut client, _events) = RealtimeClient::start(transport, RealtimeConfig::new());
        let handle = client.handle();

        // The spawned loop has not been polled yet on this thread.
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(matches!(
            handle.subscribe("thread:t1"),
            Err(AtlantiumError::NotConnected)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn authenticated_frame_updates_state() {
        let auth = serde_json::to_string(&ServerFrame::Authenticated {
            connection_id: Some("c1".into()),
        })
        .unwrap();
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Ok(auth))]);
        let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        assert!(matches!(event, RealtimeEvent::Authenticated { .. }));
        assert!(client.handle().is_authenticated());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn first_listener_subscribes_last_listener_unsubscribes() {
        let (transport, sent, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());
        let _ = events.recv().await; // Connected
        let handle = client.handle();

        let a = handle.subscribe("thread:t1").unwrap();
        let b = handle.subscribe("thread:t1").unwrap();
        settle().await;
        drop(a);
        settle().await;
        let subscribes = sent_frames(&sent)
            .into_iter()
            .filter(|f| matches!(f, ClientFrame::Subscribe { .. }))
            .count();
        assert_eq!(subscribes, 1);
        assert!(!sent_frames(&sent)
            .iter()
            .any(|f| matches!(f, ClientFrame::Unsubscribe { .. })));

        drop(b);
        settle().await;
        assert!(matches!(
            sent_frames(&sent).last(),
            Some(ClientFrame::Unsubscribe { channel }) if channel == "thread:t1"
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn subscription_ends_when_loop_exits() {
        let (transport, _sent, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());
        let _ = events.recv().await;

        let mut sub = client.handle().subscribe("thread:t1").unwrap();
        settle().await;

        client.shutdown().await;
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn registry_close_drops_every_listener() {
        let mut registry = Registry::default();
        let (sink, mut rx) = mpsc::unbounded_channel();
        registry.add("thread:t1".into(), Listener { id: 1, sink });
        assert_eq!(registry.close("thread:t1"), 1);
        assert!(rx.recv().await.is_none());
        assert!(!registry.remove("thread:t1", 1));
    }

    #[tokio::test]
    async fn dispatch_prunes_dropped_listeners() {
        let mut registry = Registry::default();
        let (sink_a, rx_a) = mpsc::unbounded_channel();
        let (sink_b, mut rx_b) = mpsc::unbounded_channel();
        registry.add("c".into(), Listener { id: 1, sink: sink_a });
        registry.add("c".into(), Listener { id: 2, sink: sink_b });
        drop(rx_a);

        let delivered = registry.dispatch("c", &json!({ "action": "x" }));
        assert_eq!(delivered, 1);
        assert_eq!(rx_b.recv().await, Some(json!({ "action": "x" })));
    }

    #[tokio::test]
    async fn publish_after_shutdown_is_not_connected() {
        let (transport, _sent, closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());
        let _ = events.recv().await;
        let handle = client.handle();

        client.shutdown().await;
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(handle.state(), ConnectionState::Disconnected);

        let result = handle.publish("thread:t1", &Envelope::new("typing_start", json!({})));
        assert!(matches!(result, Err(AtlantiumError::NotConnected)));
    }

    #[tokio::test]
    async fn disconnected_on_transport_close() {
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let (mut client, mut events) = RealtimeClient::start(transport, RealtimeConfig::new());

        let _ = events.recv().await; // Connected
        let event = events.recv().await.unwrap();
        assert!(matches!(event, RealtimeEvent::Disconnected { reason: None }));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = RealtimeConfig::default();
        assert!(config.access_token.is_none());
        assert!(config.client_version.is_some());
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = RealtimeConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
