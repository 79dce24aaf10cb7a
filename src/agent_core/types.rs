//! Shared types for the agent core.
//!
//! The directive chosen by the model and the outcome of dispatching it.

use serde::{Deserialize, Serialize};

use crate::mcp_client::CapabilityKind;

// ─── Directive ───────────────────────────────────────────────────────────────

/// The model's choice of one capability to invoke, with its arguments.
///
/// Model-facing JSON: `{"kind": "tool"|"resource", "name": ..., "arguments": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(alias = "type")]
    pub kind: CapabilityKind,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl Directive {
    pub fn tool(name: &str, arguments: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            kind: CapabilityKind::Tool,
            name: name.to_string(),
            arguments,
        }
    }

    pub fn resource(name: &str) -> Self {
        Self {
            kind: CapabilityKind::Resource,
            name: name.to_string(),
            arguments: serde_json::Map::new(),
        }
    }

    /// The JSON shape the model is asked to produce.
    pub fn to_model_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind,
            "name": self.name,
            "arguments": self.arguments,
        })
    }
}

// ─── InvocationResult ────────────────────────────────────────────────────────

/// Outcome of one dispatched invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub success: bool,
    /// The remote result, unchanged. `Null` when the call never produced one.
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Text of a tool result flagged `isError: true`. The call itself still
    /// succeeded, so `success` stays true and the payload is kept as sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_error: Option<String>,
    pub capability: String,
    pub kind: CapabilityKind,
    pub elapsed_ms: u64,
}

impl InvocationResult {
    pub fn succeeded(directive: &Directive, payload: serde_json::Value, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            payload,
            error_detail: None,
            tool_error: None,
            capability: directive.name.clone(),
            kind: directive.kind,
            elapsed_ms,
        }
    }

    pub fn failed(
        directive: &Directive,
        payload: serde_json::Value,
        error_detail: String,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            success: false,
            payload,
            error_detail: Some(error_detail),
            tool_error: None,
            capability: directive.name.clone(),
            kind: directive.kind,
            elapsed_ms,
        }
    }

    pub fn with_tool_error(mut self, text: Option<String>) -> Self {
        self.tool_error = text;
        self
    }
}
