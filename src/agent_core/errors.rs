//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::{CapabilityKind, TransportError};

/// Errors that can occur while resolving or dispatching a user turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model output was not a well-formed directive.
    #[error("could not parse directive: {reason}")]
    DirectiveParse { reason: String, raw_output: String },

    /// The directive named a capability the registry does not hold.
    #[error("unknown {kind} '{name}'")]
    UnknownCapability { name: String, kind: CapabilityKind },

    /// The directive's arguments failed the tool's parameter schema.
    #[error("invalid arguments for '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    /// The model call itself failed.
    #[error("model call failed: {0}")]
    Inference(#[from] InferenceError),

    /// Capability discovery failed.
    #[error("capability refresh failed: {0}")]
    Transport(#[from] TransportError),

    /// Reading input or writing results failed.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Stable machine-readable tag, used in the JSON error objects of the
    /// interactive loop.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::DirectiveParse { .. } => "directive_parse",
            AgentError::UnknownCapability { .. } => "unknown_capability",
            AgentError::InvalidArguments { .. } => "invalid_arguments",
            AgentError::Inference(_) => "inference",
            AgentError::Transport(_) => "transport",
            AgentError::Io(_) => "io",
        }
    }

    /// JSON error object written by the interactive loop.
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        match self {
            AgentError::DirectiveParse { raw_output, .. } => {
                obj["rawOutput"] = serde_json::json!(raw_output);
            }
            AgentError::UnknownCapability { name, kind } => {
                obj["capability"] = serde_json::json!(name);
                obj["kind"] = serde_json::json!(kind);
            }
            AgentError::InvalidArguments { name, .. } => {
                obj["capability"] = serde_json::json!(name);
            }
            _ => {}
        }
        obj
    }
}
