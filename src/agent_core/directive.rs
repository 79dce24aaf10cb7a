//! Directive resolution: ask the model which capability serves a request.
//!
//! The prompt embeds the registry's capability catalog and asks for exactly
//! one JSON object. The model is called with temperature pinned to 0 and its
//! output is parsed strictly. There is no implicit fallback: when the output
//! is unusable the caller gets [`AgentError::DirectiveParse`], unless it
//! supplied an explicit fallback through [`DirectiveResolver::resolve_or`].

use std::sync::Arc;

use crate::agent_core::errors::AgentError;
use crate::agent_core::types::Directive;
use crate::inference::{ChatMessage, ChatModel, SamplingOverrides};
use crate::mcp_client::{CapabilityKind, CapabilityRegistry, CapabilitySnapshot};

// ─── Prompt ──────────────────────────────────────────────────────────────────

const SYSTEM_INSTRUCTIONS: &str = "\
You are an orchestrator. Given the user request and the capabilities offered \
by a remote service, choose exactly one capability to invoke.

Respond with a single JSON object and nothing else:
{\"kind\": \"tool\" | \"resource\", \"name\": \"<capability name>\", \"arguments\": {...}}

Rules:
- \"name\" must be one of the capability names listed below, with its listed kind.
- For a tool, \"arguments\" must follow the tool's parameter schema.
- For a resource, \"arguments\" is {}.";

/// Build the system + user messages for one resolution.
pub fn build_messages(user_text: &str, snapshot: &CapabilitySnapshot) -> Vec<ChatMessage> {
    let catalog = serde_json::to_string_pretty(&snapshot.catalog())
        .unwrap_or_else(|_| "[]".to_string());
    vec![
        ChatMessage::system(format!(
            "{SYSTEM_INSTRUCTIONS}\n\nAvailable capabilities:\n{catalog}"
        )),
        ChatMessage::user(user_text),
    ]
}

// ─── Resolver ────────────────────────────────────────────────────────────────

/// Turns free-text user requests into [`Directive`]s using a chat model.
pub struct DirectiveResolver {
    model: Arc<dyn ChatModel>,
}

impl DirectiveResolver {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Ask the model for a directive.
    ///
    /// The registry is read once, before the model call; the returned
    /// directive is NOT checked against it (that is the dispatcher's job).
    pub async fn resolve(
        &self,
        user_text: &str,
        registry: &CapabilityRegistry,
    ) -> Result<Directive, AgentError> {
        let snapshot = registry.snapshot();
        let messages = build_messages(user_text, &snapshot);

        tracing::debug!(
            model = self.model.model_name(),
            capabilities = snapshot.len(),
            "resolving directive"
        );

        let raw = self
            .model
            .complete(messages, SamplingOverrides::deterministic_json())
            .await?;

        let directive = parse_directive(&raw)?;
        tracing::info!(
            kind = %directive.kind,
            name = %directive.name,
            "model chose capability"
        );
        Ok(directive)
    }

    /// Like [`resolve`](Self::resolve), but substitutes the caller's fallback
    /// when the model call or the parse fails.
    ///
    /// Unknown-capability checks still happen at dispatch time, for the
    /// fallback as well.
    pub async fn resolve_or(
        &self,
        user_text: &str,
        registry: &CapabilityRegistry,
        fallback: &Directive,
    ) -> Directive {
        match self.resolve(user_text, registry).await {
            Ok(directive) => directive,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    fallback = %fallback.name,
                    "directive resolution failed, using configured fallback"
                );
                fallback.clone()
            }
        }
    }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Strictly parse model output into a [`Directive`].
///
/// Accepts one JSON object, optionally wrapped in a single markdown code
/// fence. `type` is accepted in place of `kind`; a missing or `null`
/// `arguments` is an empty map.
pub fn parse_directive(raw: &str) -> Result<Directive, AgentError> {
    let fail = |reason: String| AgentError::DirectiveParse {
        reason,
        raw_output: raw.to_string(),
    };

    let text = strip_code_fence(raw.trim());
    if text.is_empty() {
        return Err(fail("empty model output".into()));
    }

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| fail(format!("output is not JSON: {e}")))?;
    let serde_json::Value::Object(mut obj) = value else {
        return Err(fail("output is not a JSON object".into()));
    };

    let kind = match (obj.remove("kind"), obj.remove("type")) {
        (Some(k), Some(t)) if k != t => {
            return Err(fail("'kind' and 'type' disagree".into()));
        }
        (Some(k), _) | (None, Some(k)) => k,
        (None, None) => return Err(fail("missing 'kind'".into())),
    };
    let kind = match kind.as_str() {
        Some("tool") => CapabilityKind::Tool,
        Some("resource") => CapabilityKind::Resource,
        _ => {
            return Err(fail(format!(
                "'kind' must be \"tool\" or \"resource\", got {kind}"
            )))
        }
    };

    let name = match obj.remove("name") {
        Some(serde_json::Value::String(name)) if !name.trim().is_empty() => name,
        Some(_) => return Err(fail("'name' must be a non-empty string".into())),
        None => return Err(fail("missing 'name'".into())),
    };

    let arguments = match obj.remove("arguments") {
        None | Some(serde_json::Value::Null) => serde_json::Map::new(),
        Some(serde_json::Value::Object(map)) => map,
        Some(other) => {
            return Err(fail(format!("'arguments' must be an object, got {other}")));
        }
    };

    Ok(Directive {
        kind,
        name,
        arguments,
    })
}

/// Remove one surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json"), whether or not a newline follows it.
    body.trim_start_matches(|c: char| c.is_ascii_alphanumeric()).trim()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Role;
    use crate::mcp_client::CapabilityDescriptor;
    use crate::test_support::ScriptedModel;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::with_snapshot(CapabilitySnapshot::from_descriptors(vec![
            CapabilityDescriptor::resource(
                "list-products",
                "catalog://products",
                Some("Product catalog"),
            ),
            CapabilityDescriptor::tool(
                "create-lead",
                Some("Create a sales lead"),
                Some(serde_json::json!({"required": ["leadLastName", "company"]})),
            ),
        ]))
    }

    #[test]
    fn test_parse_tool_directive() {
        let directive = parse_directive(
            r#"{"kind": "tool", "name": "create-lead", "arguments": {"leadLastName": "Doe"}}"#,
        )
        .unwrap();
        assert_eq!(directive.kind, CapabilityKind::Tool);
        assert_eq!(directive.name, "create-lead");
        assert_eq!(directive.arguments["leadLastName"], "Doe");
    }

    #[test]
    fn test_parse_accepts_type_and_null_arguments() {
        let directive =
            parse_directive(r#"{"type": "resource", "name": "list-products", "arguments": null}"#)
                .unwrap();
        assert_eq!(directive, Directive::resource("list-products"));
    }

    #[test]
    fn test_parse_tolerates_one_code_fence() {
        let raw = "```json\n{\"kind\": \"resource\", \"name\": \"list-products\"}\n```";
        assert_eq!(
            parse_directive(raw).unwrap(),
            Directive::resource("list-products")
        );
    }

    #[test]
    fn test_parse_tolerates_single_line_fences() {
        for raw in [
            "```{\"kind\": \"resource\", \"name\": \"list-products\"}```",
            "```json{\"kind\": \"resource\", \"name\": \"list-products\"}```",
            "```json {\"kind\": \"resource\", \"name\": \"list-products\"} ```",
            "```{\"kind\": \"resource\", \"name\": \"list-products\"}\n```",
            "```\n{\"kind\": \"resource\", \"name\": \"list-products\"}\n```",
        ] {
            assert_eq!(
                parse_directive(raw).unwrap(),
                Directive::resource("list-products"),
                "fence {raw:?}"
            );
        }
    }

    #[test]
    fn test_parse_rejects_bad_outputs() {
        for raw in [
            "not json",
            "",
            "   ",
            "[1, 2]",
            r#"{"name": "list-products"}"#,
            r#"{"kind": "prompt", "name": "x"}"#,
            r#"{"kind": "tool", "name": ""}"#,
            r#"{"kind": "tool", "name": 7}"#,
            r#"{"kind": "tool", "name": "x", "arguments": "a=b"}"#,
            r#"{"kind": "tool", "type": "resource", "name": "x"}"#,
            r#"Sure! {"kind": "tool", "name": "x"}"#,
        ] {
            let err = parse_directive(raw).unwrap_err();
            assert!(
                matches!(err, AgentError::DirectiveParse { .. }),
                "expected parse error for {raw:?}"
            );
        }
    }

    #[test]
    fn test_model_json_round_trip() {
        let args = serde_json::json!({
            "company": "Acme",
            "note": "Café \"quoted\"\nline two",
            "employees": 250,
            "revenue": 1.5e6,
            "discount": -0.25,
            "balance": -42,
            "active": false,
            "fax": null,
            "tags": ["b2b", 3, true],
            "address": {"city": "Lyon", "geo": {"lat": 45.76, "lon": 4.84}},
            "empty": {},
            "none": [],
            "blank": ""
        });
        let serde_json::Value::Object(args) = args else {
            panic!("arguments must be an object");
        };

        for directive in [
            Directive::tool("create-lead", args),
            Directive::tool("ping", serde_json::Map::new()),
            Directive::resource("list-products"),
        ] {
            let rendered = directive.to_model_json().to_string();
            assert_eq!(parse_directive(&rendered).unwrap(), directive);

            let pretty = serde_json::to_string_pretty(&directive.to_model_json()).unwrap();
            assert_eq!(parse_directive(&pretty).unwrap(), directive);
        }
    }

    #[test]
    fn test_build_messages_embeds_catalog() {
        let messages = build_messages("give me the catalog", &registry().snapshot());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("list-products"));
        assert!(messages[0].content.contains("catalog://products"));
        assert!(messages[0].content.contains("leadLastName"));
        assert_eq!(messages[1].content, "give me the catalog");
    }

    #[tokio::test]
    async fn test_resolve_pins_temperature() {
        let model = Arc::new(ScriptedModel::replies([
            r#"{"kind": "resource", "name": "list-products", "arguments": {}}"#,
        ]));
        let resolver = DirectiveResolver::new(model.clone());

        let directive = resolver
            .resolve("Give me product catalog", &registry())
            .await
            .unwrap();
        assert_eq!(directive, Directive::resource("list-products"));

        assert_eq!(model.call_count(), 1);
        let (_, sampling) = model.last_request().unwrap();
        assert_eq!(sampling.temperature, Some(0.0));
        assert!(sampling.json_response);
    }

    #[tokio::test]
    async fn test_resolve_does_not_invent_fallback() {
        let resolver = DirectiveResolver::new(Arc::new(ScriptedModel::replies(["not json"])));
        let err = resolver.resolve("anything", &registry()).await.unwrap_err();
        assert!(matches!(err, AgentError::DirectiveParse { .. }));
    }

    #[tokio::test]
    async fn test_resolve_or_uses_explicit_fallback() {
        let fallback = Directive::resource("list-products");

        let resolver = DirectiveResolver::new(Arc::new(ScriptedModel::replies(["not json"])));
        let directive = resolver.resolve_or("anything", &registry(), &fallback).await;
        assert_eq!(directive, fallback);

        let resolver = DirectiveResolver::new(Arc::new(ScriptedModel::unreachable()));
        let directive = resolver.resolve_or("anything", &registry(), &fallback).await;
        assert_eq!(directive, fallback);
    }

    #[tokio::test]
    async fn test_resolve_propagates_model_failure() {
        let resolver = DirectiveResolver::new(Arc::new(ScriptedModel::unreachable()));
        let err = resolver.resolve("anything", &registry()).await.unwrap_err();
        assert!(matches!(err, AgentError::Inference(_)));
    }
}
