//! Inference Client: OpenAI-compatible chat completions.
//!
//! This module handles all communication with the hosted model:
//! - Single-turn, non-streaming chat completions
//! - Sampling overrides (temperature pinning, JSON response format)
//! - Model configuration (`model:` section of the application config)
//!
//! The directive resolver depends only on the [`ChatModel`] trait, so the
//! model is interchangeable via config and replaceable by a scripted fake in
//! tests.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::{ChatModel, InferenceClient};
pub use config::ModelConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, Role, SamplingOverrides};
