//! Tool-session capability and the tool data that flows through a turn.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::error::ToolError;

/// Boxed future returned by [`ToolSession`] methods.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A tool advertised by a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A fully reassembled tool call, ready to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// The argument text exactly as streamed, echoed back in the assistant message.
    pub raw_arguments: String,
}

/// The outcome of one dispatched tool call, as appended to history.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

/// Output of a tool call as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ToolOutputContent>,
    pub is_error: bool,
}

/// A single piece of tool output.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputContent {
    Text { text: String },
    Image { data: String, mime_type: String },
    Resource { uri: String, text: Option<String> },
}

impl ToolOutput {
    /// Create a successful text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Create an error text output.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolOutputContent::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Flatten the output into the single string a tool-role message carries.
    pub fn to_text(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolOutputContent::Text { text } => text.clone(),
                ToolOutputContent::Image { mime_type, .. } => format!("[image: {mime_type}]"),
                ToolOutputContent::Resource { uri, text } => match text {
                    Some(text) => text.clone(),
                    None => format!("[resource: {uri}]"),
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A live connection to one tool server.
///
/// Dyn-compatible so the registry can hold `Arc<dyn ToolSession>` for every
/// server regardless of transport.
pub trait ToolSession: Send + Sync {
    /// The configured id of the server behind this session.
    fn server_name(&self) -> &str;

    /// Perform the protocol handshake. Must succeed before any other call.
    fn initialize(&self) -> SessionFuture<'_, Result<(), ToolError>>;

    /// List the tools the server exposes.
    fn list_tools(&self) -> SessionFuture<'_, Result<Vec<ToolDescriptor>, ToolError>>;

    /// Invoke a tool by name.
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: serde_json::Value,
    ) -> SessionFuture<'a, Result<ToolOutput, ToolError>>;

    /// Release the underlying transport. Calling it twice is harmless.
    fn close(&self) -> SessionFuture<'_, ()>;
}
