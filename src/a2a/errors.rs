//! A2A error types.

use thiserror::Error;

/// Errors of the A2A client, server and executors.
#[derive(Debug, Error)]
pub enum A2aError {
    /// Could not reach the remote agent.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Non-2xx HTTP response.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// No agent card at any of the well-known paths.
    #[error("no agent card found at {base_url}")]
    CardNotFound { base_url: String },

    /// The remote agent answered with a JSON-RPC error.
    #[error("agent returned error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// A response body did not have the expected shape.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The agent executor could not handle the message.
    #[error("executor failed: {reason}")]
    Executor { reason: String },

    /// The agent server could not start.
    #[error("server error: {reason}")]
    Server { reason: String },
}

impl A2aError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        A2aError::MalformedResponse {
            reason: reason.into(),
        }
    }
}
