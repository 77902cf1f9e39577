//! Uniform request execution for the pipeline stages.
//!
//! [`Transport`] is the seam between the pipeline and the network: one
//! object-safe `send` that takes a fully described [`ApiRequest`] plus a
//! [`CancellationToken`] and returns either a decoded [`ApiResponse`] or a
//! classified [`TransportError`].  Cancellation is its own error variant so
//! the controller can tell an aborted request apart from a real failure.
//!
//! [`HttpTransport`] is the production implementation over `reqwest`.  The
//! bearer credential and the optional request timeout are injected at
//! construction; requests themselves never carry auth state.  There are no
//! automatic retries — a failed request fails the turn.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ApiConfig;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Classified outcome of a failed request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The cancellation token fired while the request was in flight.
    ///
    /// Benign — never surfaced as a user-visible failure.
    #[error("request cancelled")]
    Cancelled,

    /// The server answered with a non-2xx status.
    ///
    /// `message` is already extracted with the provider-error priority order
    /// (see [`failure_message`]), so `Display` yields exactly the text the
    /// presentation layer should show.
    #[error("{message}")]
    Http { status: u16, message: String },

    /// The request could not be built or sent (connection refused, DNS,
    /// timeout, malformed multipart part, …).
    #[error("{0}")]
    Request(String),

    /// The 2xx response body could not be decoded as the expected kind.
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

/// Extract a human-readable message from a non-2xx response body.
///
/// Priority order: nested provider `error.message` → raw string body →
/// transport-level status line → `"an unknown error occurred"`.
pub fn failure_message(status: reqwest::StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
        if let Some(message) = value.as_str() {
            return message.to_string();
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }

    match status.canonical_reason() {
        Some(reason) => format!("request failed with status {} {}", status.as_u16(), reason),
        None => "an unknown error occurred".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// How the response body should be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Structured JSON (transcription, chat completion).
    Json,
    /// Raw binary payload (synthesized audio).
    Bytes,
}

/// A file part of a multipart upload.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name (e.g. `"file"`).
    pub field: String,
    /// File name reported to the server (e.g. `"audio.mp3"`).
    pub file_name: String,
    /// MIME type of the payload.
    pub mime: String,
    /// The payload itself.
    pub bytes: Vec<u8>,
}

/// Request body encodings the stages need.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// JSON document sent with `Content-Type: application/json`.
    Json(Value),
    /// Multipart form: text fields plus one file part.
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// A fully described outbound request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub body: RequestBody,
    pub expect: ResponseKind,
}

/// Decoded body of a successful response.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Json(Value),
    Bytes(Vec<u8>),
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// Consume the response as JSON; `None` when the body is binary.
    pub fn into_json(self) -> Option<Value> {
        match self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Bytes(_) => None,
        }
    }

    /// Consume the response as raw bytes; `None` when the body is JSON.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self.body {
            ResponseBody::Bytes(bytes) => Some(bytes),
            ResponseBody::Json(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe request executor.
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc<dyn Transport>`.  `send` must return [`TransportError::Cancelled`]
/// when `cancel` fires before the request completes, and must never retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError>;
}

// Compile-time assertion: Box<dyn Transport> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn Transport>) {}
};

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// Production transport over a shared `reqwest::Client`.
///
/// The client is built once with the optional timeout from [`ApiConfig`];
/// the bearer token is attached to every outgoing request.
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: String,
}

impl HttpTransport {
    /// Build a transport from provider configuration.
    ///
    /// A default client is used as a last-resort fallback if the builder
    /// fails (should never happen in practice).
    pub fn from_config(api: &ApiConfig) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = api.timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            api_key: api.api_key.clone().unwrap_or_default(),
        }
    }

    async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .bearer_auth(&self.api_key);

        builder = match request.body {
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { fields, file } => {
                let part = reqwest::multipart::Part::bytes(file.bytes)
                    .file_name(file.file_name)
                    .mime_str(&file.mime)
                    .map_err(|e| TransportError::Request(e.to_string()))?;

                let mut form = reqwest::multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                form = form.part(file.field, part);
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: failure_message(status, &body),
            });
        }

        let body = match request.expect {
            ResponseKind::Json => {
                let value = response
                    .json::<Value>()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                ResponseBody::Json(value)
            }
            ResponseKind::Bytes => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::Decode(e.to_string()))?;
                ResponseBody::Bytes(bytes.to_vec())
            }
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        let url = request.url.clone();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                log::debug!("transport: request to {url} cancelled");
                Err(TransportError::Cancelled)
            }

            result = self.dispatch(request) => result,
        }
    }
}

// ---------------------------------------------------------------------------
// MockTransport  (test double)
// ---------------------------------------------------------------------------

/// Scripted reply for [`MockTransport`].
#[cfg(test)]
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Succeed with a JSON body.
    Json(Value),
    /// Succeed with a binary body.
    Bytes(Vec<u8>),
    /// Fail with the given error.
    Fail(TransportError),
    /// Park until the request's token is cancelled, then report cancellation.
    HangUntilCancelled,
}

/// One observed `send` call.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub token: CancellationToken,
    /// Whether every token of every *earlier* call was already cancelled at
    /// the moment this call arrived — lets tests assert cancel-before-reissue
    /// ordering across sessions.
    pub earlier_all_cancelled: bool,
}

/// Scripted transport that records every call it receives.
#[cfg(test)]
pub struct MockTransport {
    replies: std::sync::Mutex<std::collections::VecDeque<MockReply>>,
    calls: std::sync::Mutex<Vec<RecordedCall>>,
}

#[cfg(test)]
impl MockTransport {
    pub fn script(replies: Vec<MockReply>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        request: ApiRequest,
        cancel: CancellationToken,
    ) -> Result<ApiResponse, TransportError> {
        let reply = {
            let mut calls = self.calls.lock().unwrap();
            let earlier_all_cancelled = calls.iter().all(|c| c.token.is_cancelled());
            calls.push(RecordedCall {
                url: request.url.clone(),
                token: cancel.clone(),
                earlier_all_cancelled,
            });
            self.replies.lock().unwrap().pop_front()
        };

        match reply {
            Some(MockReply::Json(value)) => Ok(ApiResponse {
                status: 200,
                body: ResponseBody::Json(value),
            }),
            Some(MockReply::Bytes(bytes)) => Ok(ApiResponse {
                status: 200,
                body: ResponseBody::Bytes(bytes),
            }),
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::HangUntilCancelled) => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
            None => Err(TransportError::Request("mock: no scripted reply".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    // ---- failure_message priority order ---

    #[test]
    fn nested_provider_message_wins() {
        let body = r#"{"error":{"message":"invalid_api_key","type":"auth"}}"#;
        assert_eq!(
            failure_message(StatusCode::UNAUTHORIZED, body),
            "invalid_api_key"
        );
    }

    #[test]
    fn plain_string_body_is_used_verbatim() {
        assert_eq!(
            failure_message(StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            "rate limited"
        );
    }

    #[test]
    fn json_string_body_is_unquoted() {
        assert_eq!(
            failure_message(StatusCode::BAD_REQUEST, r#""bad voice name""#),
            "bad voice name"
        );
    }

    #[test]
    fn empty_body_falls_back_to_status_line() {
        let message = failure_message(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(message, "request failed with status 500 Internal Server Error");
    }

    #[test]
    fn json_without_error_message_falls_back_to_raw_body() {
        let body = r#"{"detail":"quota exceeded"}"#;
        assert_eq!(failure_message(StatusCode::FORBIDDEN, body), body);
    }

    #[test]
    fn unknown_status_with_empty_body_uses_last_resort_message() {
        let status = StatusCode::from_u16(599).expect("valid code");
        assert_eq!(failure_message(status, ""), "an unknown error occurred");
    }

    // ---- TransportError display ---

    #[test]
    fn http_error_displays_extracted_message_only() {
        let err = TransportError::Http {
            status: 401,
            message: "invalid_api_key".into(),
        };
        assert_eq!(err.to_string(), "invalid_api_key");
    }

    #[test]
    fn cancelled_display_is_stable() {
        assert_eq!(TransportError::Cancelled.to_string(), "request cancelled");
    }

    // ---- ApiResponse accessors ---

    #[test]
    fn into_json_rejects_bytes_body() {
        let response = ApiResponse {
            status: 200,
            body: ResponseBody::Bytes(vec![1, 2, 3]),
        };
        assert!(response.into_json().is_none());
    }

    #[test]
    fn into_bytes_rejects_json_body() {
        let response = ApiResponse {
            status: 200,
            body: ResponseBody::Json(serde_json::json!({"ok": true})),
        };
        assert!(response.into_bytes().is_none());
    }

    // ---- MockTransport / cancellation ---

    #[tokio::test]
    async fn mock_hang_resolves_to_cancelled_when_token_fires() {
        let transport = MockTransport::script(vec![MockReply::HangUntilCancelled]);
        let token = CancellationToken::new();

        let request = ApiRequest {
            method: reqwest::Method::POST,
            url: "https://example.test/v1".into(),
            body: RequestBody::Json(serde_json::json!({})),
            expect: ResponseKind::Json,
        };

        let send = transport.send(request, token.clone());
        token.cancel();

        match send.await {
            Err(TransportError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
        assert!(transport.calls()[0].token.is_cancelled());
    }
}
