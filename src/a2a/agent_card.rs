//! Agent card generation for `.well-known/agent-card.json`.
//!
//! The public card advertises the skill of the configured executor. The
//! authenticated extended card is derived from it under a different name and
//! version; in hello-world mode it also adds the `super_hello_world` skill.

use serde::{Deserialize, Serialize};

use crate::a2a::types::*;

/// Which executor the agent server runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// Always answers "Hello World".
    #[default]
    HelloWorld,
    /// Runs model-directed dispatch against the capability server.
    Dispatch,
}

fn hello_world_skill() -> AgentSkill {
    AgentSkill {
        id: "hello_world".to_string(),
        name: "Returns hello world".to_string(),
        description: "just returns hello world".to_string(),
        tags: vec!["hello world".to_string()],
        examples: vec!["hi".to_string(), "hello world".to_string()],
    }
}

fn super_hello_world_skill() -> AgentSkill {
    AgentSkill {
        id: "super_hello_world".to_string(),
        name: "Returns a SUPER Hello World".to_string(),
        description: "A more enthusiastic greeting, only for authenticated users.".to_string(),
        tags: vec![
            "hello world".to_string(),
            "super".to_string(),
            "extended".to_string(),
        ],
        examples: vec!["super hi".to_string(), "give me a super hello".to_string()],
    }
}

fn dispatch_skill() -> AgentSkill {
    AgentSkill {
        id: "capability_dispatch".to_string(),
        name: "Invokes a remote capability".to_string(),
        description: "Picks the capability of the connected MCP server that serves the \
                      request, invokes it and returns the result as JSON."
            .to_string(),
        tags: vec!["mcp".to_string(), "dispatch".to_string()],
        examples: vec!["Give me product catalog".to_string()],
    }
}

/// Build the public agent card.
pub fn public_card(public_url: &str, mode: AgentMode) -> AgentCard {
    let (name, description, skill) = match mode {
        AgentMode::HelloWorld => (
            "Hello World Agent",
            "Just a hello world agent",
            hello_world_skill(),
        ),
        AgentMode::Dispatch => (
            "Capability Dispatch Agent",
            "Routes each request to one capability of a connected MCP server",
            dispatch_skill(),
        ),
    };

    AgentCard {
        name: name.to_string(),
        description: description.to_string(),
        url: public_url.to_string(),
        version: "1.0.0".to_string(),
        protocol_version: PROTOCOL_VERSION.to_string(),
        preferred_transport: "JSONRPC".to_string(),
        default_input_modes: vec!["text".to_string()],
        default_output_modes: vec!["text".to_string()],
        capabilities: AgentCapabilities { streaming: true },
        skills: vec![skill],
        supports_authenticated_extended_card: true,
    }
}

/// Build the authenticated extended card from the public one.
pub fn extended_card(public: &AgentCard) -> AgentCard {
    let mut skills = public.skills.clone();
    if skills.iter().any(|s| s.id == "hello_world") {
        skills.push(super_hello_world_skill());
    }

    AgentCard {
        name: format!("{} - Extended Edition", public.name),
        description: format!(
            "The full-featured {} for authenticated users.",
            public.name.to_lowercase()
        ),
        version: "1.0.1".to_string(),
        skills,
        ..public.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_card_json() {
        let card = public_card("http://localhost:9999/", AgentMode::HelloWorld);
        let json = serde_json::to_value(&card).unwrap();

        assert_eq!(json["name"], "Hello World Agent");
        assert_eq!(json["url"], "http://localhost:9999/");
        assert_eq!(json["protocolVersion"], "0.3.0");
        assert_eq!(json["preferredTransport"], "JSONRPC");
        assert_eq!(json["capabilities"]["streaming"], true);
        assert_eq!(json["supportsAuthenticatedExtendedCard"], true);
        assert_eq!(json["skills"][0]["id"], "hello_world");
        assert_eq!(json["defaultInputModes"], serde_json::json!(["text"]));
    }

    #[test]
    fn test_extended_card_adds_skill() {
        let public = public_card("http://localhost:9999/", AgentMode::HelloWorld);
        let extended = extended_card(&public);

        assert_eq!(extended.version, "1.0.1");
        assert_ne!(extended.name, public.name);
        assert_eq!(extended.url, public.url);
        let ids: Vec<&str> = extended.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["hello_world", "super_hello_world"]);
    }

    #[test]
    fn test_extended_card_keeps_hello_world_wording() {
        let extended = extended_card(&public_card("http://localhost:9999/", AgentMode::HelloWorld));
        assert_eq!(extended.name, "Hello World Agent - Extended Edition");
        assert_eq!(
            extended.description,
            "The full-featured hello world agent for authenticated users."
        );
    }

    #[test]
    fn test_dispatch_mode_cards_are_named_for_dispatch() {
        let card = public_card("http://localhost:9999/", AgentMode::Dispatch);
        assert_eq!(card.name, "Capability Dispatch Agent");
        assert!(!card.description.to_lowercase().contains("hello"));
        assert_eq!(card.skills[0].id, "capability_dispatch");

        let extended = extended_card(&card);
        assert_eq!(extended.name, "Capability Dispatch Agent - Extended Edition");
        assert!(!extended.description.to_lowercase().contains("hello"));
        let ids: Vec<&str> = extended.skills.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["capability_dispatch"]);
    }
}
