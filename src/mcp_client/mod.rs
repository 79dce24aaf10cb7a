//! MCP Client: JSON-RPC over HTTP POST to a single capability server.
//!
//! This module handles:
//! - JSON-RPC 2.0 request/response correlation over HTTP
//! - Capability discovery (`tools/list`, `resources/list`, `prompts/list`)
//! - The swap-on-complete capability registry consulted by the dispatcher
//!
//! The dispatcher and session loop only see the [`Transport`] trait.

pub mod errors;
pub mod registry;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::TransportError;
pub use registry::{CapabilityDescriptor, CapabilityKind, CapabilityRegistry, CapabilitySnapshot};
pub use transport::{HttpTransport, Transport};
