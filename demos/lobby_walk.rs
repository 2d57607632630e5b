//! # Lobby Walk Example
//!
//! Joins the Atlantium lobby, listens to presence broadcasts and walks the
//! local avatar one cell to the right every few seconds until Ctrl+C.
//!
//! 1. Load backend configuration from the environment
//! 2. Connect the realtime WebSocket and bootstrap the lobby
//! 3. Subscribe to the lobby channel and apply broadcasts
//! 4. Move optimistically; failed moves roll back
//! 5. Leave the lobby and shut down
//!
//! ## Running
//!
//! ```sh
//! ATLANTIUM_ACCESS_TOKEN=... ATLANTIUM_USER_ID=... cargo run --example lobby_walk
//!
//! # Override the endpoints:
//! ATLANTIUM_API_URL=http://localhost:8080/v1 ATLANTIUM_REALTIME_URL=ws://localhost:8080/ws \
//!     cargo run --example lobby_walk
//! ```

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use atlantium_client::protocol::lobby_channel;
use atlantium_client::{
    BackendConfig, ConnectionState, Direction, HttpBackend, LobbyConfig, LobbyPresence,
    RealtimeClient, RealtimeConfig, RealtimeEvent, WebSocketTransport,
};

/// Realtime endpoint when `ATLANTIUM_REALTIME_URL` is not set.
const DEFAULT_REALTIME_URL: &str = "wss://rt.atlantium.app/ws";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let backend_config = BackendConfig::from_env();
    let token = backend_config
        .access_token
        .clone()
        .ok_or("ATLANTIUM_ACCESS_TOKEN is required")?;
    let user_id = std::env::var("ATLANTIUM_USER_ID")?;
    let realtime_url = std::env::var("ATLANTIUM_REALTIME_URL")
        .unwrap_or_else(|_| DEFAULT_REALTIME_URL.to_string());
    let backend = HttpBackend::new(backend_config)?;

    // ── Connect ─────────────────────────────────────────────────────
    tracing::info!("connecting to {realtime_url}");
    let transport = WebSocketTransport::connect_with_token(&realtime_url, &token).await?;
    let (mut client, mut events) = RealtimeClient::start(
        transport,
        RealtimeConfig::new().with_access_token(token.as_str()),
    );

    // ── Lobby ───────────────────────────────────────────────────────
    let mut lobby = LobbyPresence::new(user_id, LobbyConfig::new());
    lobby.bootstrap(&backend, &AtomicBool::new(false)).await?;
    let thread_id = lobby.thread_id().ok_or("lobby has no thread id")?.to_owned();
    tracing::info!(
        "in lobby {thread_id} with {} member(s), standing at {:?}",
        lobby.member_count(),
        lobby.my_position()
    );

    let mut state = client.handle().watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await?;
    let mut presence = client.handle().subscribe(&lobby_channel(&thread_id))?;
    let mut walk = tokio::time::interval(Duration::from_secs(3));

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            raw = presence.recv() => {
                let Some(raw) = raw else {
                    tracing::warn!("lobby subscription ended");
                    break;
                };
                if lobby.apply_envelope(&raw) {
                    tracing::info!("{} member(s) in lobby", lobby.member_count());
                }
            }

            _ = walk.tick() => {
                match lobby.step(&backend, Direction::Right).await {
                    Ok(to) => tracing::info!("moved to ({}, {})", to.col, to.row),
                    Err(e) => tracing::warn!("move refused: {e}"),
                }
            }

            event = events.recv() => match event {
                Some(RealtimeEvent::Disconnected { reason }) => {
                    tracing::info!("disconnected: {}", reason.as_deref().unwrap_or("clean"));
                    break;
                }
                Some(other) => tracing::debug!("realtime event: {other:?}"),
                None => break,
            },

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, leaving");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    drop(presence);
    lobby.leave(&backend).await;
    client.shutdown().await;
    Ok(())
}
