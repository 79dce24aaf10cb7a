//! JSON-RPC over HTTP POST transport.
//!
//! Handles low-level communication with a single remote MCP endpoint:
//! - One HTTP POST per JSON-RPC request
//! - Request id generation and response correlation
//! - Bounded per-call timeout
//! - Plain JSON or one-shot `text/event-stream` response bodies

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client as HttpClient;

use super::errors::TransportError;
use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::sse::parse_sse_body;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a whole request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Monotonic request id counter, one per transport instance.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Generate a unique request ID.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// A JSON-RPC capability endpoint.
///
/// `call` returns the `result` member of the response. Implementations must
/// be usable concurrently through `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError>;

    /// The endpoint this transport talks to (for logs and error messages).
    fn endpoint(&self) -> &str;
}

/// JSON-RPC transport over HTTP POST to one endpoint.
pub struct HttpTransport {
    endpoint: String,
    http: HttpClient,
    timeout: Duration,
    ids: RequestIds,
}

impl HttpTransport {
    /// Create a transport for `endpoint` with a per-call `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, TransportError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
            timeout,
            ids: RequestIds::new(),
        })
    }

    /// The per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST one request and read the whole body.
    async fn post(
        &self,
        request: &JsonRpcRequest,
    ) -> Result<(u16, Option<String>, String), reqwest::Error> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        Ok((status, content_type, body))
    }

    fn classify(&self, method: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if err.is_decode() || err.is_body() {
            TransportError::MalformedResponse {
                method: method.to_string(),
                reason: format!("failed to read response body: {err}"),
            }
        } else {
            TransportError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let id = self.ids.next_id();
        let request = JsonRpcRequest::new(id, method, params);
        let start = Instant::now();

        tracing::debug!(endpoint = %self.endpoint, method, id, "sending JSON-RPC request");

        let (status, content_type, body) = tokio::time::timeout(self.timeout, self.post(&request))
            .await
            .map_err(|_| TransportError::Timeout {
                method: method.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| self.classify(method, e))?;

        if !(200..300).contains(&status) {
            tracing::warn!(endpoint = %self.endpoint, method, status, "JSON-RPC request rejected");
            return Err(TransportError::Status {
                endpoint: self.endpoint.clone(),
                status,
                body,
            });
        }

        let response = decode_response(method, id, content_type.as_deref(), &body)?;

        tracing::debug!(
            method,
            id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "JSON-RPC response received"
        );

        extract_result(method, response)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Decode a response body and check that it answers request `id`.
pub fn decode_response(
    method: &str,
    id: u64,
    content_type: Option<&str>,
    body: &str,
) -> Result<JsonRpcResponse, TransportError> {
    let is_event_stream = content_type
        .map(|ct| ct.trim_start().starts_with("text/event-stream"))
        .unwrap_or(false);

    if is_event_stream {
        return parse_sse_body(body)
            .into_iter()
            .filter_map(|event| serde_json::from_str::<JsonRpcResponse>(&event.data).ok())
            .find(|resp| resp.id.as_ref().map(|r| r.matches(id)).unwrap_or(false))
            .ok_or_else(|| TransportError::MalformedResponse {
                method: method.to_string(),
                reason: format!("no event in stream answered request {id}"),
            });
    }

    let response: JsonRpcResponse =
        serde_json::from_str(body).map_err(|e| TransportError::MalformedResponse {
            method: method.to_string(),
            reason: format!("invalid JSON-RPC body: {e}"),
        })?;

    match &response.id {
        Some(rid) if rid.matches(id) => Ok(response),
        Some(other) => Err(TransportError::MalformedResponse {
            method: method.to_string(),
            reason: format!("response id {other:?} does not match request id {id}"),
        }),
        // A server may omit the id when it could not parse the request at all.
        None if response.error.is_some() => Ok(response),
        None => Err(TransportError::MalformedResponse {
            method: method.to_string(),
            reason: "response has no id".into(),
        }),
    }
}

/// Extract the result from a JSON-RPC response, converting errors to `TransportError`.
pub fn extract_result(
    method: &str,
    response: JsonRpcResponse,
) -> Result<serde_json::Value, TransportError> {
    if let Some(err) = response.error {
        return Err(TransportError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response
        .result
        .ok_or_else(|| TransportError::MalformedResponse {
            method: method.to_string(),
            reason: "response missing both result and error".into(),
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
