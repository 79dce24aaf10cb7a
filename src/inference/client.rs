//! OpenAI-compatible inference client.
//!
//! Sends single-turn chat completion requests to a hosted model and returns
//! the text of the first choice. The [`ChatModel`] trait is the seam the
//! directive resolver depends on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::ModelConfig;
use super::errors::InferenceError;
use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ResponseFormat, SamplingOverrides,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatModel ───────────────────────────────────────────────────────────────

/// A chat model that turns a message list into one text answer.
///
/// Implementations are treated as unreliable: the returned text may be empty,
/// prose, or malformed JSON. Callers validate it.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingOverrides,
    ) -> Result<String, InferenceError>;

    /// Model identifier, for logs.
    fn model_name(&self) -> &str;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: ModelConfig,
    api_key: String,
}

impl InferenceClient {
    /// Create a client from the model configuration.
    ///
    /// Fails if no credential is configured. Does NOT check connectivity.
    pub fn from_config(config: ModelConfig) -> Result<Self, InferenceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| InferenceError::ConfigError {
                reason: "no API key configured for the model endpoint".into(),
            })?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            api_key,
        })
    }

    /// The base URL of the model endpoint.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingOverrides,
    ) -> ChatCompletionRequest {
        let response_format = if sampling.json_response && self.config.force_json_response {
            Some(ResponseFormat {
                r#type: "json_object".to_string(),
            })
        } else {
            None
        };

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: sampling.temperature.unwrap_or(self.config.temperature),
            max_tokens: self.config.max_tokens,
            stream: false,
            response_format,
        }
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        sampling: SamplingOverrides,
    ) -> Result<String, InferenceError> {
        let url = self.config.completions_url();
        let body = self.build_request(messages, sampling);

        // Log the request metadata (not the full body)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            temperature = body.temperature,
            json_response = body.response_format.is_some(),
            "=== LLM REQUEST ==="
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout {
                        duration_secs: self.config.request_timeout_secs,
                    }
                } else {
                    InferenceError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_completion(&body_text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Extract the trimmed text of the first choice.
///
/// A `null` content is returned as an empty string; deciding whether that is
/// usable is the caller's job.
pub fn parse_completion(body: &str) -> Result<String, InferenceError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("invalid completion JSON: {e}"),
        })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| InferenceError::MalformedResponse {
            reason: "completion has no choices".into(),
        })?;

    Ok(choice.message.content.unwrap_or_default().trim().to_string())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
