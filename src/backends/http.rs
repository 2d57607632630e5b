//! HTTP implementation of [`BackendApi`] on top of `reqwest`.
//!
//! Endpoints (relative to [`BackendConfig::base_url`]):
//!
//! | Call                  | Request                                          |
//! |-----------------------|--------------------------------------------------|
//! | `get_lobby`           | `GET  /lobby`                                    |
//! | `join_lobby`          | `POST /lobby/join`                               |
//! | `leave_lobby`         | `POST /lobby/leave`                              |
//! | `move_lobby`          | `POST /lobby/move` `{col, row}`                  |
//! | `get_thread_messages` | `GET  /threads/{id}/messages?page=&page_size=`   |
//! | `send_message`        | `POST /threads/{id}/messages` `{content}`        |
//!
//! Non-success responses are decoded from `{"error"|"message": ..., "code": ...}`
//! into [`AtlantiumError::Backend`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::BackendApi;
use crate::error::AtlantiumError;
use crate::error_codes::ErrorCode;
use crate::normalize::message_from_payload;
use crate::protocol::{JoinLobbyResponse, LobbySnapshot, MessagesPage, SendMessageResponse};

pub const DEFAULT_API_URL: &str = "https://api.atlantium.app/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

// ── Configuration ───────────────────────────────────────────────────

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// API root without a trailing slash.
    pub base_url: String,
    /// Session token sent as a bearer `Authorization` header.
    pub access_token: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `ATLANTIUM_API_URL`: default [`DEFAULT_API_URL`]
    /// - `ATLANTIUM_ACCESS_TOKEN`
    /// - `ATLANTIUM_REQUEST_TIMEOUT_SECS`: default 30
    /// - `ATLANTIUM_CONNECT_TIMEOUT_SECS`: default 10
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("ATLANTIUM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let secs = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(default)
        };

        Self {
            access_token: lookup("ATLANTIUM_ACCESS_TOKEN").filter(|t| !t.is_empty()),
            request_timeout: Duration::from_secs(secs(
                "ATLANTIUM_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            connect_timeout: Duration::from_secs(secs(
                "ATLANTIUM_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            ..Self::new(base_url)
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// [`BackendApi`] over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    config: BackendConfig,
}

impl HttpBackend {
    /// # Errors
    ///
    /// Returns [`AtlantiumError::Http`] if the HTTP client cannot be built.
    pub fn new(config: BackendConfig) -> Result<Self, AtlantiumError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| AtlantiumError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, AtlantiumError> {
        let request = match &self.config.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| AtlantiumError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| AtlantiumError::Http(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(backend_error(status, &text));
        }
        // Empty bodies decode as `null`, which satisfies `()` responses.
        let body = if text.trim().is_empty() { "null" } else { &text };
        Ok(serde_json::from_str(body)?)
    }
}

#[derive(Serialize)]
struct MoveRequest {
    col: u16,
    row: u16,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<ErrorCode>,
}

fn backend_error(status: u16, body: &str) -> AtlantiumError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let (message, error_code) = match parsed {
        Some(ErrorBody {
            error,
            message,
            code,
        }) => (error.or(message), code),
        None => (None, None),
    };
    AtlantiumError::Backend {
        status,
        message: message.unwrap_or_else(|| body.trim().to_string()),
        error_code,
    }
}

/// Decode a history page, dropping entries that fail the message shape check.
fn decode_page(value: &Value) -> MessagesPage {
    let raw = value
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let messages: Vec<_> = raw.iter().filter_map(message_from_payload).collect();
    if messages.len() != raw.len() {
        debug!(
            dropped = raw.len() - messages.len(),
            "dropped malformed history entries"
        );
    }
    MessagesPage { messages }
}

#[async_trait]
impl BackendApi for HttpBackend {
    async fn get_lobby(&self) -> Result<LobbySnapshot, AtlantiumError> {
        self.execute(self.http.get(self.url("/lobby"))).await
    }

    async fn join_lobby(&self) -> Result<JoinLobbyResponse, AtlantiumError> {
        let response: Option<JoinLobbyResponse> =
            self.execute(self.http.post(self.url("/lobby/join"))).await?;
        Ok(response.unwrap_or_default())
    }

    async fn leave_lobby(&self) -> Result<(), AtlantiumError> {
        let _: Value = self.execute(self.http.post(self.url("/lobby/leave"))).await?;
        Ok(())
    }

    async fn move_lobby(&self, col: u16, row: u16) -> Result<(), AtlantiumError> {
        let request = self
            .http
            .post(self.url("/lobby/move"))
            .json(&MoveRequest { col, row });
        let _: Value = self.execute(request).await?;
        Ok(())
    }

    async fn get_thread_messages(
        &self,
        thread_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<MessagesPage, AtlantiumError> {
        let request = self
            .http
            .get(self.url(&format!("/threads/{thread_id}/messages")))
            .query(&[("page", page), ("page_size", page_size)]);
        let value: Value = self.execute(request).await?;
        Ok(decode_page(&value))
    }

    async fn send_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<SendMessageResponse, AtlantiumError> {
        let request = self
            .http
            .post(self.url(&format!("/threads/{thread_id}/messages")))
            .json(&SendMessageRequest { content });
        self.execute(request).await
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
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_defaults_without_env() {
        let config = BackendConfig::from_lookup(|_| None);
        assert_eq!(config, BackendConfig::default());
        assert_eq!(config.base_url, DEFAULT_API_URL);
        assert!(config.access_token.is_none());
    }

    #[test]
    fn config_reads_overrides() {
        let config = BackendConfig::from_lookup(lookup_from(&[
            ("ATLANTIUM_API_URL", "http://localhost:8080/v1/"),
            ("ATLANTIUM_ACCESS_TOKEN", "tok"),
            ("ATLANTIUM_REQUEST_TIMEOUT_SECS", "5"),
            ("ATLANTIUM_CONNECT_TIMEOUT_SECS", "2"),
        ]));
        assert_eq!(config.base_url, "http://localhost:8080/v1");
        assert_eq!(config.access_token.as_deref(), Some("tok"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn config_ignores_unparsable_timeouts_and_empty_token() {
        let config = BackendConfig::from_lookup(lookup_from(&[
            ("ATLANTIUM_ACCESS_TOKEN", ""),
            ("ATLANTIUM_REQUEST_TIMEOUT_SECS", "soon"),
        ]));
        assert!(config.access_token.is_none());
        assert_eq!(
            config.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
    }

    #[test]
    fn url_joins_base_and_path() {
        let backend = HttpBackend::new(BackendConfig::new("https://api.test/v1/")).unwrap();
        assert_eq!(
            backend.url("/threads/t1/messages"),
            "https://api.test/v1/threads/t1/messages"
        );
    }

    #[test]
    fn backend_error_decodes_structured_body() {
        let err = backend_error(409, r#"{"error":"cell taken","code":"POSITION_OCCUPIED"}"#);
        match err {
            AtlantiumError::Backend {
                status,
                message,
                error_code,
            } => {
                assert_eq!(status, 409);
                assert_eq!(message, "cell taken");
                assert_eq!(error_code, Some(ErrorCode::PositionOccupied));
            }
            other => panic!("expected Backend, got {other:?}"),
        }
    }

    #[test]
    fn backend_error_keeps_message_for_unrecognized_code() {
        let err = backend_error(422, r#"{"message":"too fast","code":"SOME_NEW_CODE"}"#);
        assert!(matches!(
            err,
            AtlantiumError::Backend {
                status: 422,
                ref message,
                error_code: Some(ErrorCode::Unknown),
            } if message == "too fast"
        ));
    }

    #[test]
    fn backend_error_falls_back_to_raw_body() {
        let err = backend_error(502, "Bad Gateway\n");
        assert!(matches!(
            err,
            AtlantiumError::Backend {
                status: 502,
                ref message,
                error_code: None,
            } if message == "Bad Gateway"
        ));
    }

    #[test]
    fn decode_page_drops_malformed_entries() {
        let page = decode_page(&json!({
            "messages": [
                { "message_id": "m1", "thread_id": "t1", "sender_id": "u1", "content": "a" },
                { "thread_id": "t1", "content": "no id" },
                { "message_id": "m2", "thread_id": "t1", "sender_id": "u2", "content": "b" }
            ]
        }));
        let ids: Vec<_> = page.messages.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn decode_page_tolerates_missing_list() {
        assert!(decode_page(&json!({})).messages.is_empty());
    }
}
