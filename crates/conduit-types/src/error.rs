//! Error hierarchy for Conduit.

use thiserror::Error;

/// Top-level error type for a conversation turn.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("Model stream error: {0}")]
    Api(#[from] ApiError),

    #[error("No connected tool server provides '{name}'")]
    Routing { name: String },

    #[error("Arguments for tool '{tool}' are not valid JSON: {message}")]
    ArgumentParse { tool: String, message: String },

    #[error("Stopped after {rounds} tool rounds without a final answer")]
    ToolLoopLimit { rounds: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Chat service has stopped")]
    ServiceStopped,
}

/// Errors from the chat-completion endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Rate limited (retry after {retry_after_ms:?}ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Server error: {status} {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Stream parse error: {0}")]
    StreamParse(String),

    #[error("Stream aborted by provider: {0}")]
    StreamAborted(String),

    #[error("Request timeout")]
    Timeout,
}

/// Errors raised by a tool session.
///
/// A tool that runs and reports failure is not an error here: that comes back
/// as a [`crate::ToolOutput`] with `is_error` set.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool server '{server}' is not initialized")]
    NotInitialized { server: String },

    #[error("Tool server '{server}' is closed")]
    Closed { server: String },

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool protocol error: {0}")]
    Protocol(String),

    #[error("Tool timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file parse error at {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Missing required configuration: {key}")]
    MissingKey { key: String },

    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
