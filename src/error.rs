//! Error types for the Atlantium client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::lobby::MoveRejection;

/// Errors that can occur when using the Atlantium client.
#[derive(Debug, Error)]
pub enum AtlantiumError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a wire message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active realtime connection.
    #[error("not connected to realtime server")]
    NotConnected,

    /// Attempted a channel operation without a bound channel.
    #[error("not subscribed to a channel")]
    NotSubscribed,

    /// The realtime server returned an error frame.
    #[error("server error: {message}")]
    ServerError {
        /// Human-readable error message from the server.
        message: String,
        /// Structured error code, if provided by the server.
        error_code: Option<ErrorCode>,
    },

    /// A backend REST call returned a non-success response.
    #[error("backend error ({status}): {message}")]
    Backend {
        /// HTTP status code of the response.
        status: u16,
        /// Error message decoded from the response body.
        message: String,
        /// Structured error code, if the body carried one.
        error_code: Option<ErrorCode>,
    },

    /// The HTTP request could not be built or did not complete.
    #[error("http error: {0}")]
    Http(String),

    /// A lobby move was rejected locally before reaching the backend.
    #[error("move rejected: {0}")]
    MoveRejected(#[from] MoveRejection),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Atlantium client operations.
pub type Result<T> = std::result::Result<T, AtlantiumError>;
