//! Capability registry: the client's view of what a remote endpoint offers.
//!
//! Provides:
//! - Discovery of tools, resources and prompts through a [`Transport`]
//! - Atomic swap-on-complete refresh (readers never see a partial registry)
//! - Lookup by `(name, kind)`
//! - Argument validation against a tool's parameter schema
//! - Serialization of the capabilities into the model-facing catalog

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::TransportError;
use super::transport::Transport;
use super::types::{
    error_codes, McpPromptDefinition, McpResourceDefinition, McpToolDefinition, PromptsPage,
    ResourcesPage, ToolsPage,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Upper bound on `nextCursor` pages followed for a single listing.
const MAX_PAGES: usize = 100;

// ─── Capability Types ────────────────────────────────────────────────────────

/// What sort of capability a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// A callable tool (`tools/call`).
    Tool,
    /// A readable resource (`resources/read`).
    Resource,
}

impl CapabilityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Resource => "resource",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub kind: CapabilityKind,
    /// Resource URI; `None` for tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the tool's arguments, when the server published one.
    #[serde(rename = "parameterSchema", skip_serializing_if = "Option::is_none")]
    pub parameter_schema: Option<serde_json::Value>,
}

impl CapabilityDescriptor {
    /// Build a tool descriptor.
    pub fn tool(
        name: &str,
        description: Option<&str>,
        parameter_schema: Option<serde_json::Value>,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: CapabilityKind::Tool,
            locator: None,
            description: description.map(str::to_string),
            parameter_schema,
        }
    }

    /// Build a resource descriptor.
    pub fn resource(name: &str, uri: &str, description: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind: CapabilityKind::Resource,
            locator: Some(uri.to_string()),
            description: description.map(str::to_string),
            parameter_schema: None,
        }
    }

    fn from_tool(def: McpToolDefinition) -> Self {
        let schema = if def.input_schema.is_null() {
            None
        } else {
            Some(def.input_schema)
        };
        Self {
            name: def.name,
            kind: CapabilityKind::Tool,
            locator: None,
            description: def.description,
            parameter_schema: schema,
        }
    }

    fn from_resource(def: McpResourceDefinition) -> Self {
        Self {
            name: def.name,
            kind: CapabilityKind::Resource,
            locator: Some(def.uri),
            description: def.description,
            parameter_schema: None,
        }
    }

    /// Validate arguments against the parameter schema.
    ///
    /// This is a basic structural check: required fields present and correct
    /// JSON types for declared top-level properties. Full JSON Schema
    /// validation is left to the server.
    pub fn validate_arguments(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), String> {
        let Some(schema) = &self.parameter_schema else {
            return Ok(());
        };

        if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !arguments.contains_key(field) {
                    return Err(format!("missing required field: '{field}'"));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
            for (key, value) in arguments {
                let expected = properties
                    .get(key)
                    .and_then(|p| p.get("type"))
                    .and_then(|t| t.as_str());
                if let Some(expected) = expected {
                    if !json_type_matches(expected, value) {
                        return Err(format!("field '{key}' should be of type {expected}"));
                    }
                }
            }
        }

        Ok(())
    }

    /// Entry for the model-facing capability catalog.
    fn catalog_entry(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "kind": self.kind,
            "name": self.name,
        });
        if let Some(description) = &self.description {
            entry["description"] = serde_json::json!(description);
        }
        if let Some(uri) = &self.locator {
            entry["uri"] = serde_json::json!(uri);
        }
        if let Some(schema) = &self.parameter_schema {
            entry["parameters"] = schema.clone();
        }
        entry
    }
}

fn json_type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Immutable result of one complete discovery pass.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySnapshot {
    capabilities: HashMap<(CapabilityKind, String), CapabilityDescriptor>,
    prompts: Vec<McpPromptDefinition>,
}

impl CapabilitySnapshot {
    /// Build a snapshot from descriptors. The first descriptor wins on a
    /// duplicate `(kind, name)`.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = CapabilityDescriptor>) -> Self {
        let mut capabilities = HashMap::new();
        for descriptor in descriptors {
            let key = (descriptor.kind, descriptor.name.clone());
            if capabilities.contains_key(&key) {
                tracing::warn!(
                    name = %descriptor.name,
                    kind = %descriptor.kind,
                    "duplicate capability name, keeping the first"
                );
                continue;
            }
            capabilities.insert(key, descriptor);
        }
        Self {
            capabilities,
            prompts: Vec::new(),
        }
    }

    /// Build a snapshot from raw discovery listings.
    pub fn from_discovery(
        tools: Vec<McpToolDefinition>,
        resources: Vec<McpResourceDefinition>,
        prompts: Vec<McpPromptDefinition>,
    ) -> Self {
        let descriptors = tools
            .into_iter()
            .map(CapabilityDescriptor::from_tool)
            .chain(resources.into_iter().map(CapabilityDescriptor::from_resource));
        let mut snapshot = Self::from_descriptors(descriptors);
        snapshot.prompts = prompts;
        snapshot
    }

    /// Look up a capability by name and kind.
    pub fn lookup(&self, name: &str, kind: CapabilityKind) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(&(kind, name.to_string()))
    }

    /// All descriptors, ordered by kind then name.
    pub fn descriptors(&self) -> Vec<&CapabilityDescriptor> {
        let mut all: Vec<&CapabilityDescriptor> = self.capabilities.values().collect();
        all.sort_by(|a, b| (a.kind, &a.name).cmp(&(b.kind, &b.name)));
        all
    }

    /// Sorted names of all capabilities of one kind.
    pub fn names(&self, kind: CapabilityKind) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .capabilities
            .values()
            .filter(|d| d.kind == kind)
            .map(|d| d.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Prompt templates advertised by the server (not dispatchable).
    pub fn prompts(&self) -> &[McpPromptDefinition] {
        &self.prompts
    }

    /// Number of dispatchable capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// The capability list embedded in the model prompt.
    pub fn catalog(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.descriptors()
                .into_iter()
                .map(CapabilityDescriptor::catalog_entry)
                .collect(),
        )
    }

    /// Full listing for display (`discover`).
    pub fn to_json(&self) -> serde_json::Value {
        let by_kind = |kind: CapabilityKind| -> Vec<&CapabilityDescriptor> {
            self.descriptors()
                .into_iter()
                .filter(|d| d.kind == kind)
                .collect()
        };
        serde_json::json!({
            "tools": by_kind(CapabilityKind::Tool),
            "resources": by_kind(CapabilityKind::Resource),
            "prompts": self.prompts,
        })
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Holds the current snapshot and replaces it wholesale on refresh.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    current: RwLock<Arc<CapabilitySnapshot>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that starts from a known snapshot.
    pub fn with_snapshot(snapshot: CapabilitySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Stays valid even if a refresh swaps in a new one.
    pub fn snapshot(&self) -> Arc<CapabilitySnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the current snapshot.
    pub fn install(&self, snapshot: CapabilitySnapshot) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }

    /// Look up a capability in the current snapshot.
    pub fn lookup(&self, name: &str, kind: CapabilityKind) -> Option<CapabilityDescriptor> {
        self.snapshot().lookup(name, kind).cloned()
    }

    /// Number of dispatchable capabilities in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Re-discover all capabilities and swap them in.
    ///
    /// The three listings run concurrently. On any failure the previous
    /// snapshot is left in place and the error is returned.
    pub async fn refresh(&self, transport: &dyn Transport) -> Result<usize, TransportError> {
        let (tools, resources, prompts) = tokio::try_join!(
            list_all(transport, "tools/list", split_tools),
            list_all(transport, "resources/list", split_resources),
            list_all(transport, "prompts/list", split_prompts),
        )
        .inspect_err(|e| {
            tracing::warn!(
                endpoint = %transport.endpoint(),
                error = %e,
                "capability refresh failed, keeping previous registry"
            );
        })?;

        let (tool_count, resource_count, prompt_count) =
            (tools.len(), resources.len(), prompts.len());
        let snapshot = CapabilitySnapshot::from_discovery(tools, resources, prompts);
        let total = snapshot.len();
        self.install(snapshot);

        tracing::info!(
            endpoint = %transport.endpoint(),
            tools = tool_count,
            resources = resource_count,
            prompts = prompt_count,
            "capability registry refreshed"
        );

        Ok(total)
    }
}

fn split_tools(page: ToolsPage) -> (Vec<McpToolDefinition>, Option<String>) {
    (page.tools, page.next_cursor)
}

fn split_resources(page: ResourcesPage) -> (Vec<McpResourceDefinition>, Option<String>) {
    (page.resources, page.next_cursor)
}

fn split_prompts(page: PromptsPage) -> (Vec<McpPromptDefinition>, Option<String>) {
    (page.prompts, page.next_cursor)
}

/// Run one listing method to completion, following `nextCursor`.
///
/// A server answering "method not found" on the first page simply does not
/// offer that capability class.
async fn list_all<P, T>(
    transport: &dyn Transport,
    method: &str,
    split: fn(P) -> (Vec<T>, Option<String>),
) -> Result<Vec<T>, TransportError>
where
    P: DeserializeOwned,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
        let result = match transport.call(method, params).await {
            Ok(result) => result,
            Err(e) if cursor.is_none() && e.rpc_code() == Some(error_codes::METHOD_NOT_FOUND) => {
                tracing::info!(method, "listing not supported by server, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let page: P =
            serde_json::from_value(result).map_err(|e| TransportError::MalformedResponse {
                method: method.to_string(),
                reason: format!("unexpected listing shape: {e}"),
            })?;
        let (mut batch, next) = split(page);
        items.append(&mut batch);

        match next {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(items),
        }
    }

    Err(TransportError::MalformedResponse {
        method: method.to_string(),
        reason: format!("listing did not finish within {MAX_PAGES} pages"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
