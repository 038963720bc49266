//! Error types for MCP operations.

use conduit_types::ToolError;
use thiserror::Error;

/// Errors from MCP server communication.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn MCP server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("MCP server '{name}' has neither a baseUrl nor a command")]
    NoTransport { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("HTTP {status} from MCP server '{server}': {message}")]
    Http {
        server: String,
        status: u16,
        message: String,
    },

    #[error("Network error talking to '{server}': {message}")]
    Network { server: String, message: String },

    #[error("MCP server '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Tool '{tool}' from '{server}' collides with the one from '{existing}'")]
    ToolCollision {
        tool: String,
        server: String,
        existing: String,
    },

    #[error("Tool server '{server}' failed: {source}")]
    Session { server: String, source: ToolError },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<McpError> for ToolError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Timeout { timeout_ms, .. } => ToolError::Timeout { timeout_ms },
            McpError::JsonRpc { message, .. } => ToolError::ExecutionFailed(message),
            McpError::Session { source, .. } => source,
            other => ToolError::Protocol(other.to_string()),
        }
    }
}
