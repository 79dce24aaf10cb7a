//! Agent Core: model-directed dispatch.
//!
//! Submodules:
//! - `directive`: Builds the capability prompt and strictly parses the model's choice
//! - `dispatcher`: Validates a directive against the registry and invokes it
//! - `session`: One-shot and interactive drivers over refresh → resolve → dispatch
//! - `types`: Directive and InvocationResult
//! - `errors`: Agent-level error types

pub mod directive;
pub mod dispatcher;
pub mod errors;
pub mod session;
pub mod types;

// Re-exports for convenience
pub use directive::{parse_directive, DirectiveResolver};
pub use dispatcher::Dispatcher;
pub use errors::AgentError;
pub use session::{RefreshPolicy, Session, SessionOptions, TurnOutcome};
pub use types::{Directive, InvocationResult};
