//! Session loop: drives refresh → resolve → dispatch for user turns.
//!
//! Two drivers share one [`Session`]:
//! - one-shot: a single request, errors propagate to the caller;
//! - interactive: one turn per input line, per-turn errors are written as
//!   JSON error objects and the loop continues until an exit keyword or the
//!   end of input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::agent_core::directive::DirectiveResolver;
use crate::agent_core::dispatcher::Dispatcher;
use crate::agent_core::errors::AgentError;
use crate::agent_core::types::{Directive, InvocationResult};
use crate::mcp_client::{CapabilityRegistry, Transport};

// ─── Options ─────────────────────────────────────────────────────────────────

/// When the capability registry is re-discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Once, before the first turn.
    #[default]
    Startup,
    /// Before every turn. A failed refresh fails that turn.
    EveryTurn,
}

/// Behavioural knobs of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub refresh_policy: RefreshPolicy,
    /// Lines that end the interactive loop (compared case-insensitively).
    pub exit_keywords: Vec<String>,
    /// Directive used when resolution fails. `None` means failures surface.
    pub fallback: Option<Directive>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_policy: RefreshPolicy::default(),
            exit_keywords: vec!["exit".to_string(), "quit".to_string()],
            fallback: None,
        }
    }
}

/// What one turn chose and what came back.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub directive: Directive,
    pub result: InvocationResult,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One client session against one capability endpoint.
pub struct Session {
    transport: Arc<dyn Transport>,
    registry: Arc<CapabilityRegistry>,
    resolver: DirectiveResolver,
    dispatcher: Dispatcher,
    options: SessionOptions,
    refreshed: AtomicBool,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<CapabilityRegistry>,
        resolver: DirectiveResolver,
        dispatcher: Dispatcher,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            registry,
            resolver,
            dispatcher,
            options,
            refreshed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Discover capabilities. Returns the number of dispatchable ones.
    pub async fn start(&self) -> Result<usize, AgentError> {
        let count = self.registry.refresh(self.transport.as_ref()).await?;
        self.refreshed.store(true, Ordering::Release);
        Ok(count)
    }

    /// Run one user turn.
    pub async fn turn(&self, user_text: &str) -> Result<TurnOutcome, AgentError> {
        let must_refresh = match self.options.refresh_policy {
            RefreshPolicy::EveryTurn => true,
            RefreshPolicy::Startup => !self.refreshed.load(Ordering::Acquire),
        };
        if must_refresh {
            self.start().await?;
        }

        let directive = match &self.options.fallback {
            Some(fallback) => {
                self.resolver
                    .resolve_or(user_text, &self.registry, fallback)
                    .await
            }
            None => self.resolver.resolve(user_text, &self.registry).await?,
        };

        let result = self
            .dispatcher
            .dispatch(&directive, &self.registry, self.transport.as_ref())
            .await?;

        Ok(TurnOutcome { directive, result })
    }

    /// One-shot: refresh, resolve, dispatch, report.
    ///
    /// Same as a first [`turn`](Self::turn); both refresh policies discover
    /// exactly once here.
    pub async fn run_once(&self, user_text: &str) -> Result<TurnOutcome, AgentError> {
        self.turn(user_text).await
    }

    /// Interactive loop over `input` lines, writing one JSON line per turn.
    ///
    /// Returns `Ok(())` on an exit keyword or end of input. Only I/O errors
    /// and a failed startup refresh end the loop with an error.
    pub async fn run_interactive<R, W>(&self, input: R, output: &mut W) -> Result<(), AgentError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.options.refresh_policy == RefreshPolicy::Startup {
            self.start().await?;
        }

        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            if self.is_exit_keyword(text) {
                tracing::debug!(keyword = text, "exit keyword received");
                break;
            }

            let rendered = match self.turn(text).await {
                Ok(outcome) => serde_json::to_value(&outcome).unwrap_or_else(|e| {
                    serde_json::json!({"error": "serialization", "message": e.to_string()})
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "turn failed");
                    e.to_json()
                }
            };

            output.write_all(rendered.to_string().as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }

        Ok(())
    }

    fn is_exit_keyword(&self, text: &str) -> bool {
        self.options
            .exit_keywords
            .iter()
            .any(|k| k.eq_ignore_ascii_case(text))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::{CapabilityKind, TransportError};
    use crate::test_support::{ScriptedModel, ScriptedTransport};

    const LIST_PRODUCTS: &str = r#"{"kind": "resource", "name": "list-products", "arguments": {}}"#;

    fn server() -> ScriptedTransport {
        ScriptedTransport::new()
            .respond("tools/list", serde_json::json!({"tools": []}))
            .respond(
                "resources/list",
                serde_json::json!({"resources": [{"name": "list-products", "uri": "catalog://products"}]}),
            )
            .respond("prompts/list", serde_json::json!({"prompts": []}))
            .respond(
                "resources/read",
                serde_json::json!({"contents": [{"text": "[\"Widget\"]"}]}),
            )
    }

    fn session(
        transport: Arc<ScriptedTransport>,
        model: ScriptedModel,
        options: SessionOptions,
    ) -> Session {
        Session::new(
            transport,
            Arc::new(CapabilityRegistry::new()),
            DirectiveResolver::new(Arc::new(model)),
            Dispatcher::default(),
            options,
        )
    }

    #[tokio::test]
    async fn test_run_once_dispatches() {
        let transport = Arc::new(server());
        let session = session(
            transport.clone(),
            ScriptedModel::replies([LIST_PRODUCTS]),
            SessionOptions::default(),
        );

        let outcome = session.run_once("Give me product catalog").await.unwrap();
        assert!(outcome.result.success);
        assert_eq!(outcome.directive.kind, CapabilityKind::Resource);
        assert_eq!(transport.calls_to("resources/read"), 1);
        assert_eq!(transport.calls_to("resources/list"), 1);
    }

    #[tokio::test]
    async fn test_run_once_propagates_parse_error_without_dispatch() {
        let transport = Arc::new(server());
        let session = session(
            transport.clone(),
            ScriptedModel::replies(["not json"]),
            SessionOptions::default(),
        );

        let err = session.run_once("anything").await.unwrap_err();
        assert!(matches!(err, AgentError::DirectiveParse { .. }));
        assert_eq!(transport.calls_to("resources/read"), 0);
    }

    #[tokio::test]
    async fn test_configured_fallback_is_applied() {
        let transport = Arc::new(server());
        let options = SessionOptions {
            fallback: Some(Directive::resource("list-products")),
            ..SessionOptions::default()
        };
        let session = session(
            transport.clone(),
            ScriptedModel::replies(["not json"]),
            options,
        );

        let outcome = session.run_once("anything").await.unwrap();
        assert!(outcome.result.success);
        assert_eq!(transport.calls_to("resources/read"), 1);
    }

    #[tokio::test]
    async fn test_interactive_loop() {
        let transport = Arc::new(server());
        let session = session(
            transport.clone(),
            ScriptedModel::replies([
                LIST_PRODUCTS,
                "not json",
                r#"{"kind": "tool", "name": "nope"}"#,
            ]),
            SessionOptions::default(),
        );

        let input: &[u8] = b"catalog please\n\n   \nbad output\nunknown tool\nQUIT\nnever read\n";
        let mut output = Vec::new();
        session.run_interactive(input, &mut output).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["result"]["success"], true);
        assert_eq!(lines[1]["error"], "directive_parse");
        assert_eq!(lines[2]["error"], "unknown_capability");

        // Startup policy: one discovery pass for the whole loop.
        assert_eq!(transport.calls_to("resources/list"), 1);
    }

    #[tokio::test]
    async fn test_interactive_end_of_input_is_clean_exit() {
        let session = session(
            Arc::new(server()),
            ScriptedModel::replies([LIST_PRODUCTS]),
            SessionOptions::default(),
        );
        let input: &[u8] = b"";
        let mut output = Vec::new();
        session.run_interactive(input, &mut output).await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_every_turn_refresh_failure_keeps_registry() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond("tools/list", serde_json::json!({"tools": []}))
                .respond(
                    "resources/list",
                    serde_json::json!({"resources": [{"name": "list-products", "uri": "catalog://products"}]}),
                )
                .fail(
                    "resources/list",
                    TransportError::Timeout {
                        method: "resources/list".into(),
                        timeout_ms: 10,
                    },
                )
                .respond("prompts/list", serde_json::json!({"prompts": []}))
                .respond("resources/read", serde_json::json!({"contents": []})),
        );
        let options = SessionOptions {
            refresh_policy: RefreshPolicy::EveryTurn,
            ..SessionOptions::default()
        };
        let session = session(
            transport.clone(),
            ScriptedModel::replies([LIST_PRODUCTS]),
            options,
        );

        session.turn("first").await.unwrap();
        let err = session.turn("second").await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(_)));

        assert!(session
            .registry()
            .lookup("list-products", CapabilityKind::Resource)
            .is_some());
        assert_eq!(transport.calls_to("resources/read"), 1);
    }
}
