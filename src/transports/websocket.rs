//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries realtime frames as WebSocket text frames.
//! Both `ws://` and `wss://` URLs are supported; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), atlantium_client::AtlantiumError> {
//! use atlantium_client::{Transport, WebSocketTransport};
//!
//! let mut transport =
//!     WebSocketTransport::connect_with_token("wss://rt.atlantium.app/ws", "session-token").await?;
//! transport.send(r#"{"type":"ping"}"#.to_string()).await?;
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::AtlantiumError;
use crate::transport::Transport;

/// The underlying WebSocket stream, public so callers can wrap a stream they
/// connected themselves via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect without credentials.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::Io`] if the URL is invalid or the connection
    /// cannot be established.
    pub async fn connect(url: &str) -> Result<Self, AtlantiumError> {
        let request = url.into_client_request().map_err(handshake_error)?;
        Self::connect_request(url, request).await
    }

    /// Connect and present `token` as a bearer `Authorization` header during
    /// the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::Io`] if the URL or token is invalid or the
    /// connection cannot be established.
    pub async fn connect_with_token(url: &str, token: &str) -> Result<Self, AtlantiumError> {
        let mut request = url.into_client_request().map_err(handshake_error)?;
        let header = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            AtlantiumError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;
        request.headers_mut().insert(AUTHORIZATION, header);
        Self::connect_request(url, request).await
    }

    /// Same as [`connect`](Self::connect) but fails with
    /// [`AtlantiumError::Timeout`] after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`AtlantiumError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, AtlantiumError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| AtlantiumError::Timeout)?
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    async fn connect_request(
        url: &str,
        request: tokio_tungstenite::tungstenite::handshake::client::Request,
    ) -> Result<Self, AtlantiumError> {
        tracing::debug!(url = %url, "connecting to realtime server");
        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(handshake_error)?;
        tracing::info!(url = %url, "realtime connection established");
        Ok(Self::from_stream(stream))
    }
}

/// Preserve the I/O error kind when there is one.
fn handshake_error(e: tokio_tungstenite::tungstenite::Error) -> AtlantiumError {
    let kind = match &e {
        tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
        _ => std::io::ErrorKind::Other,
    };
    AtlantiumError::Io(std::io::Error::new(kind, e))
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), AtlantiumError> {
        if self.closed {
            return Err(AtlantiumError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| AtlantiumError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, AtlantiumError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(AtlantiumError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary WebSocket frame, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), AtlantiumError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| AtlantiumError::TransportSend(e.to_string()))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, AtlantiumError::Io(_)));
    }

    #[tokio::test]
    async fn connect_with_token_rejects_header_breaking_token() {
        let err = WebSocketTransport::connect_with_token("ws://127.0.0.1:1", "bad\ntoken")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AtlantiumError::Io(e) if e.kind() == std::io::ErrorKind::InvalidInput
        ));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns its URL.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn token_is_sent_as_bearer_header() {
        use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<Option<String>>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                let _ = seen_tx.send(auth);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(tcp, callback)
                .await
                .unwrap();
            let _ = ws.close(None).await;
        });

        let _transport = WebSocketTransport::connect_with_token(&format!("ws://{addr}"), "abc")
            .await
            .unwrap();
        assert_eq!(seen_rx.await.unwrap().as_deref(), Some("Bearer abc"));
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"pong"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert_eq!(msg, r#"{"type":"pong"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_round_trip() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"type":"subscribe","data":{"channel":"thread:t1"}}"#.to_string())
            .await
            .unwrap();
        let msg = transport.recv().await.unwrap().unwrap();
        assert!(msg.contains("thread:t1"));
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("oops".to_string()).await.unwrap_err();
        assert!(matches!(err, AtlantiumError::TransportClosed));
    }
}
