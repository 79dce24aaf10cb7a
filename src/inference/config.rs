//! Hosted model configuration.
//!
//! One OpenAI-compatible endpoint, one model, one credential. Loaded as the
//! `model:` section of the application config and overridden by
//! `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL`.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

// ─── Defaults ────────────────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_force_json_response() -> bool {
    true
}

// ─── ModelConfig ─────────────────────────────────────────────────────────────

/// Runtime configuration of the hosted chat model.
#[derive(Clone, Deserialize)]
pub struct ModelConfig {
    /// API root, e.g. `https://api.openai.com/v1`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bearer credential. Required before any request is made.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Default sampling temperature when a call does not override it.
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// When `true`, sends `response_format: {"type":"json_object"}` on calls
    /// that ask for JSON output.
    #[serde(default = "default_force_json_response")]
    pub force_json_response: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: 0.0,
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            force_json_response: default_force_json_response(),
        }
    }
}

impl ModelConfig {
    /// Full URL of the chat completions endpoint.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// The credential never reaches logs.
impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("force_json_response", &self.force_json_response)
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config: ModelConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.temperature, 0.0);
        assert!(config.force_json_response);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_completions_url_trims_trailing_slash() {
        let config = ModelConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..ModelConfig::default()
        };
        assert_eq!(
            config.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = ModelConfig {
            api_key: Some("sk-secret".into()),
            ..ModelConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
