//! Transport abstraction for the realtime connection.
//!
//! The [`Transport`] trait is a bidirectional channel of JSON text frames.
//! Framing is the implementation's concern (WebSocket frames, SSE + POST,
//! an in-process loopback for tests).
//!
//! # Connection Setup
//!
//! Connection setup is NOT part of this trait. Construct a connected
//! transport externally, then pass it to `RealtimeClient::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use atlantium_client::error::AtlantiumError;
//! use atlantium_client::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct Loopback {
//!     tx: mpsc::UnboundedSender<String>,
//!     rx: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for Loopback {
//!     async fn send(&mut self, message: String) -> Result<(), AtlantiumError> {
//!         self.tx
//!             .send(message)
//!             .map_err(|e| AtlantiumError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, AtlantiumError>> {
//!         self.rx.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), AtlantiumError> {
//!         self.rx.close();
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::AtlantiumError;

/// A bidirectional text frame transport for the realtime connection.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. Channel-based implementations are naturally
/// cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), AtlantiumError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, AtlantiumError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources.
    async fn close(&mut self) -> Result<(), AtlantiumError>;
}
