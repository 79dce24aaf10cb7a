//! A2A (Agent-to-Agent) surface over the dispatch pattern.
//!
//! - Agent card discovery (`.well-known/agent-card.json`, legacy `agent.json`)
//!   and the authenticated extended card
//! - JSON-RPC 2.0 `message/send` and `message/stream` (SSE)
//! - Hello-world and dispatch-backed executors
//! - A card-resolving client with streaming support

pub mod agent_card;
pub mod client;
pub mod errors;
pub mod executor;
pub mod server;
pub mod types;

// Re-exports for convenience
pub use agent_card::AgentMode;
pub use client::A2aClient;
pub use errors::A2aError;
pub use executor::{AgentExecutor, DispatchExecutor, HelloWorldExecutor};
pub use server::{build_router, A2aState};
pub use types::{AgentCard, Message};
