//! MCP transport error types.

use thiserror::Error;

/// Errors that can occur while talking to the remote capability endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Non-2xx HTTP response from the endpoint.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        method: String,
        timeout_ms: u64,
    },

    /// The response body was not a usable JSON-RPC response.
    #[error("malformed response to '{method}': {reason}")]
    MalformedResponse {
        method: String,
        reason: String,
    },

    /// TCP/HTTP connection to the endpoint failed.
    #[error("connection to {endpoint} failed: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// Server returned a JSON-RPC error object.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl TransportError {
    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// Only idempotent reads may act on this; tool calls are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::ConnectionFailed { .. }
                | TransportError::Status {
                    status: 500..=599,
                    ..
                }
        )
    }

    /// The JSON-RPC error code, if this is a server-side error.
    pub fn rpc_code(&self) -> Option<i32> {
        match self {
            TransportError::ServerError { code, .. } => Some(*code),
            _ => None,
        }
    }
}
