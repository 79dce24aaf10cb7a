//! A2A client: resolve an agent card, send a message, stream replies.

use std::pin::Pin;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Client as HttpClient;
use reqwest::StatusCode;

use crate::a2a::errors::A2aError;
use crate::a2a::types::*;
use crate::sse::SseDecoder;

/// Well-known card paths, current first.
const CARD_PATHS: [&str; 2] = [".well-known/agent-card.json", ".well-known/agent.json"];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Stream of `result` members of a `message/stream` response.
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, A2aError>> + Send>>;

/// Client for one remote A2A agent.
pub struct A2aClient {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl A2aClient {
    /// `timeout` bounds card fetches and `message/send`; streams are only
    /// bounded by the connect timeout.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, A2aError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| A2aError::ConnectionFailed {
                url: base_url.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Fetch the public agent card, falling back to the legacy path on 404.
    pub async fn fetch_agent_card(&self) -> Result<AgentCard, A2aError> {
        for path in CARD_PATHS {
            let url = format!("{}/{path}", self.base_url);
            tracing::debug!(%url, "fetching agent card");

            let resp = self
                .http
                .get(&url)
                .header(ACCEPT, "application/json")
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| connection_failed(&url, e))?;

            if resp.status() == StatusCode::NOT_FOUND {
                continue;
            }
            let resp = check_status(&url, resp).await?;
            let card: AgentCard = resp
                .json()
                .await
                .map_err(|e| A2aError::malformed(format!("invalid agent card: {e}")))?;

            tracing::info!(name = %card.name, version = %card.version, "fetched agent card");
            return Ok(card);
        }

        Err(A2aError::CardNotFound {
            base_url: self.base_url.clone(),
        })
    }

    /// `message/send`: returns the `result` member (a message or a task).
    pub async fn send_message(
        &self,
        card: &AgentCard,
        text: &str,
    ) -> Result<serde_json::Value, A2aError> {
        let url = self.rpc_url(card);
        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .json(&rpc_body("message/send", text))
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let resp = check_status(&url, resp).await?;

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| A2aError::malformed(format!("invalid JSON-RPC response: {e}")))?;
        into_result(body)
    }

    /// `message/stream`: yields each event's `result` in arrival order.
    ///
    /// Dropping the stream closes the HTTP response.
    pub async fn send_message_streaming(
        &self,
        card: &AgentCard,
        text: &str,
    ) -> Result<ReplyStream, A2aError> {
        let url = self.rpc_url(card);
        let resp = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&rpc_body("message/stream", text))
            .send()
            .await
            .map_err(|e| connection_failed(&url, e))?;
        let resp = check_status(&url, resp).await?;

        let events = stream::unfold(
            (resp.bytes_stream(), SseDecoder::new(), false),
            |(mut bytes, mut decoder, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(event) = decoder.next_event() {
                        return Some((decode_event(&event.data), (bytes, decoder, false)));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => decoder.push(&chunk),
                        Some(Err(e)) => {
                            let err = A2aError::malformed(format!("stream read error: {e}"));
                            return Some((Err(err), (bytes, decoder, true)));
                        }
                        None => {
                            let event = decoder.finish()?;
                            return Some((decode_event(&event.data), (bytes, decoder, true)));
                        }
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }

    /// JSON-RPC endpoint: the card's `url`, or the base URL when the card has none.
    fn rpc_url(&self, card: &AgentCard) -> String {
        if card.url.starts_with("http://") || card.url.starts_with("https://") {
            card.url.clone()
        } else {
            format!("{}/", self.base_url)
        }
    }
}

fn rpc_body(method: &str, text: &str) -> JsonRpcRequest {
    let params = MessageSendParams {
        message: Message::user_text(text),
        metadata: None,
    };
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: serde_json::json!(uuid::Uuid::new_v4().to_string()),
        method: method.to_string(),
        params: serde_json::to_value(params).unwrap_or_default(),
    }
}

fn connection_failed(url: &str, e: reqwest::Error) -> A2aError {
    A2aError::ConnectionFailed {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

async fn check_status(url: &str, resp: reqwest::Response) -> Result<reqwest::Response, A2aError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(A2aError::Status {
        url: url.to_string(),
        status: status.as_u16(),
        body,
    })
}

fn into_result(body: JsonRpcResponse) -> Result<serde_json::Value, A2aError> {
    if let Some(error) = body.error {
        return Err(A2aError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    body.result
        .ok_or_else(|| A2aError::malformed("response has neither result nor error"))
}

fn decode_event(data: &str) -> Result<serde_json::Value, A2aError> {
    let body: JsonRpcResponse = serde_json::from_str(data)
        .map_err(|e| A2aError::malformed(format!("invalid stream event: {e}")))?;
    into_result(body)
}

// ─── Rendering ───────────────────────────────────────────────────────────────

/// Text parts of a `message/send` / `message/stream` result.
///
/// Handles a bare message as well as a task carrying a status message and
/// artifacts.
pub fn extract_text_parts(result: &serde_json::Value) -> Vec<String> {
    let mut part_lists: Vec<&serde_json::Value> = Vec::new();
    if let Some(parts) = result.get("parts") {
        part_lists.push(parts);
    }
    if let Some(parts) = result.pointer("/status/message/parts") {
        part_lists.push(parts);
    }
    if let Some(artifacts) = result.get("artifacts").and_then(|a| a.as_array()) {
        part_lists.extend(artifacts.iter().filter_map(|a| a.get("parts")));
    }

    part_lists
        .into_iter()
        .filter_map(|parts| parts.as_array())
        .flatten()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .map(str::to_string)
        .collect()
}

/// Pretty-print a text part if it is JSON, otherwise return it unchanged.
pub fn render_text_part(text: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_object() || value.is_array() => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| text.to_string())
        }
        _ => text.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
