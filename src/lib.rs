//! # Atlantium Client
//!
//! Realtime client core for Atlantium: thread channels, typing indicators and
//! lobby presence reconciliation over one shared realtime connection.
//!
//! ## Features
//!
//! - **Shared connection**: [`RealtimeClient`] multiplexes named channel
//!   subscriptions over any [`Transport`]
//! - **Thread channels**: [`ThreadChannel`] yields messages and typing
//!   indicators that expire on their own after three seconds
//! - **Lobby presence**: [`LobbyPresence`] applies optimistic grid moves and
//!   rolls them back when the backend refuses
//! - **Message history**: [`MessageLog`] de-duplicates inbound messages and
//!   swaps temporary ids for server ids
//! - **Built-in I/O**: the default `transport-websocket` and `backend-http`
//!   features provide `WebSocketTransport` and `HttpBackend`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use atlantium_client::*;
//!
//! let transport = WebSocketTransport::connect_with_token(url, &token).await?;
//! let (client, _events) = RealtimeClient::start(
//!     transport,
//!     RealtimeConfig::new().with_access_token(&token),
//! );
//!
//! let mut thread = ThreadChannel::new(client.handle(), ThreadChannelConfig::new("u1"));
//! thread.subscribe("t1");
//! while let Some(event) = thread.next_event().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod api;
pub mod backends;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod lobby;
pub mod messages;
pub mod normalize;
pub mod protocol;
pub mod realtime;
pub mod thread;
pub mod transport;
pub mod transports;
pub mod typing;

pub use api::BackendApi;
pub use error::AtlantiumError;
pub use error_codes::ErrorCode;
pub use event::{RealtimeEvent, ThreadEvent};
pub use lobby::{Direction, LobbyConfig, LobbyPresence, MoveRejection, MoveState};
pub use messages::MessageLog;
pub use protocol::{GridPosition, Member, ThreadMessage};
pub use realtime::{ConnectionState, RealtimeClient, RealtimeConfig, RealtimeHandle};
pub use thread::{ThreadChannel, ThreadChannelConfig};
pub use transport::Transport;

#[cfg(feature = "backend-http")]
pub use backends::{BackendConfig, HttpBackend};
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
