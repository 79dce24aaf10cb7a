//! Dispatcher: validates a directive and forwards it to the remote service.
//!
//! Lifecycle per directive: lookup → (optional) validate → invoke. A
//! directive naming a capability the registry does not hold under the same
//! kind is rejected before any transport activity. Transport failures during
//! the invocation are captured in the [`InvocationResult`], not raised.

use std::time::{Duration, Instant};

use crate::agent_core::errors::AgentError;
use crate::agent_core::types::{Directive, InvocationResult};
use crate::mcp_client::{
    CapabilityDescriptor, CapabilityKind, CapabilityRegistry, Transport, TransportError,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Base delay for exponential backoff between resource read attempts.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Dispatches directives against a registry snapshot.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    validate_arguments: bool,
    resource_retries: u32,
    retry_base_delay: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            validate_arguments: false,
            resource_retries: 0,
            retry_base_delay: RETRY_BASE_DELAY,
        }
    }
}

impl Dispatcher {
    pub fn new(validate_arguments: bool, resource_retries: u32) -> Self {
        Self {
            validate_arguments,
            resource_retries,
            ..Self::default()
        }
    }

    /// Override the backoff base delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Dispatch one directive.
    ///
    /// Errors only for directives that must not reach the transport
    /// (unknown capability, invalid arguments). Everything after that is an
    /// `InvocationResult`, successful or not.
    pub async fn dispatch(
        &self,
        directive: &Directive,
        registry: &CapabilityRegistry,
        transport: &dyn Transport,
    ) -> Result<InvocationResult, AgentError> {
        let start = Instant::now();

        // 1. Lookup
        let Some(descriptor) = registry.lookup(&directive.name, directive.kind) else {
            tracing::warn!(
                name = %directive.name,
                kind = %directive.kind,
                "directive names an unknown capability"
            );
            return Err(AgentError::UnknownCapability {
                name: directive.name.clone(),
                kind: directive.kind,
            });
        };

        // 2. Validate
        if self.validate_arguments {
            descriptor
                .validate_arguments(&directive.arguments)
                .map_err(|reason| AgentError::InvalidArguments {
                    name: directive.name.clone(),
                    reason,
                })?;
        }

        // 3. Invoke
        let outcome = match directive.kind {
            CapabilityKind::Resource => self.read_resource(&descriptor, transport).await,
            CapabilityKind::Tool => {
                let params = serde_json::json!({
                    "name": directive.name,
                    "arguments": directive.arguments,
                });
                transport.call("tools/call", Some(params)).await
            }
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        // 4. Report
        let result = match outcome {
            Ok(payload) => {
                let tool_error = tool_error_text(directive.kind, &payload);
                if let Some(text) = &tool_error {
                    tracing::info!(name = %directive.name, error = %text, "tool reported an error");
                }
                InvocationResult::succeeded(directive, payload, elapsed_ms)
                    .with_tool_error(tool_error)
            }
            Err(e) => {
                tracing::warn!(
                    name = %directive.name,
                    kind = %directive.kind,
                    error = %e,
                    "invocation failed"
                );
                InvocationResult::failed(
                    directive,
                    serde_json::Value::Null,
                    e.to_string(),
                    elapsed_ms,
                )
            }
        };

        tracing::info!(
            name = %result.capability,
            kind = %result.kind,
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            "dispatch complete"
        );

        Ok(result)
    }

    /// `resources/read`, retrying transient failures with exponential backoff.
    async fn read_resource(
        &self,
        descriptor: &CapabilityDescriptor,
        transport: &dyn Transport,
    ) -> Result<serde_json::Value, TransportError> {
        let params = serde_json::json!({ "uri": descriptor.locator });

        let mut attempt = 0;
        loop {
            match transport.call("resources/read", Some(params.clone())).await {
                Err(e) if e.is_transient() && attempt < self.resource_retries => {
                    attempt += 1;
                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    tracing::debug!(
                        name = %descriptor.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying resource read"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

/// Text of a tool result flagged `isError: true`, if it is one. Reported
/// next to the payload; it does not turn the invocation into a failure.
fn tool_error_text(kind: CapabilityKind, payload: &serde_json::Value) -> Option<String> {
    if kind != CapabilityKind::Tool || payload.get("isError") != Some(&serde_json::json!(true)) {
        return None;
    }

    let text: Vec<&str> = payload
        .get("content")
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        Some("tool reported an error".to_string())
    } else {
        Some(text.join("\n"))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
