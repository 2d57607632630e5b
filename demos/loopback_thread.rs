//! # Loopback Thread Example
//!
//! Drives a [`ThreadChannel`] against an in-process loopback transport: a
//! fake server accepts the subscription, publishes a message and a typing
//! indicator, and the indicator expires three seconds later.
//!
//! ## Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example loopback_thread
//! ```

use async_trait::async_trait;
use atlantium_client::protocol::{ClientFrame, ServerFrame};
use atlantium_client::{
    AtlantiumError, RealtimeClient, RealtimeConfig, ThreadChannel, ThreadChannelConfig,
    ThreadEvent, Transport,
};
use serde_json::json;
use tokio::sync::mpsc;

// ── Loopback transport ──────────────────────────────────────────────

/// Client half; handed to `RealtimeClient::start`.
struct LoopbackTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half; reads client frames and injects server frames.
struct LoopbackServer {
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

fn loopback_pair() -> (LoopbackTransport, LoopbackServer) {
    let (client_tx, server_rx) = mpsc::unbounded_channel();
    let (server_tx, client_rx) = mpsc::unbounded_channel();
    (
        LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        },
        LoopbackServer {
            rx: server_rx,
            tx: server_tx,
        },
    )
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), AtlantiumError> {
        self.tx
            .send(message)
            .map_err(|e| AtlantiumError::TransportSend(e.to_string()))
    }

    // Cancel-safe: `UnboundedReceiver::recv` is.
    async fn recv(&mut self) -> Option<Result<String, AtlantiumError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), AtlantiumError> {
        Ok(())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl LoopbackServer {
    fn send(&self, frame: &ServerFrame) -> Result<(), BoxError> {
        self.tx.send(serde_json::to_string(frame)?)?;
        Ok(())
    }

    async fn wait_for_subscribe(&mut self) -> Result<String, BoxError> {
        while let Some(text) = self.rx.recv().await {
            let frame: ClientFrame = serde_json::from_str(&text)?;
            tracing::info!("server received: {frame:?}");
            if let ClientFrame::Subscribe { channel } = frame {
                return Ok(channel);
            }
        }
        Err("client hung up before subscribing".into())
    }
}

// ── Main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut server) = loopback_pair();
    let (mut client, _events) =
        RealtimeClient::start(transport, RealtimeConfig::new().with_access_token("demo"));

    let mut thread = ThreadChannel::new(client.handle(), ThreadChannelConfig::new("alice"));
    thread.subscribe("t1");

    // Binding completes on the first poll once the loop is running.
    let server_task = tokio::spawn(async move {
        let channel = server.wait_for_subscribe().await?;
        server.send(&ServerFrame::Message {
            channel: channel.clone(),
            message: json!({
                "action": "event",
                "payload": { "data": {
                    "action": "new_message",
                    "payload": {
                        "message_id": "m-1",
                        "thread_id": "t1",
                        "sender": { "user_id": "bob", "username": "bob" },
                        "content": "hello from the loopback",
                        "created_at": "2024-05-01T10:00:00Z"
                    }
                } }
            }),
        })?;
        server.send(&ServerFrame::Message {
            channel,
            message: json!({
                "action": "typing_start",
                "payload": { "user_id": "bob", "thread_id": "t1" }
            }),
        })?;
        Ok::<_, BoxError>(server)
    });

    let mut seen = 0;
    while let Some(event) = thread.next_event().await {
        match &event {
            ThreadEvent::MessageReceived(msg) => {
                tracing::info!("{}: {}", msg.sender_username, msg.content);
            }
            ThreadEvent::TypingStarted { user_id } => tracing::info!("{user_id} is typing"),
            ThreadEvent::TypingStopped { user_id } => tracing::info!("{user_id} stopped typing"),
        }
        seen += 1;
        if matches!(event, ThreadEvent::TypingStopped { .. }) {
            break;
        }
    }

    // Keep the server half alive until shutdown so the loop sees no hangup.
    let _server = server_task.await?.map_err(|e| e.to_string())?;
    thread.unsubscribe();
    client.shutdown().await;
    tracing::info!("done, saw {seen} thread event(s)");
    Ok(())
}
