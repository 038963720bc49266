//! MCP session: one initialized connection to a tool server.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! paginated tool discovery (tools/list), and tool invocation (tools/call).

use crate::config::{McpServerConfig, ServerTransport};
use crate::error::McpError;
use crate::transport::{
    HttpWithSseFallback, SseTransport, StdioTransport, StreamableHttpTransport, Transport,
};
use conduit_types::{
    SessionFuture, ToolDescriptor, ToolError, ToolOutput, ToolOutputContent, ToolSession,
};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};

/// MCP protocol version we support.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Guard against servers that hand back the same cursor forever.
const MAX_LIST_PAGES: usize = 100;

/// A content item in a tool result, as sent on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum McpToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: EmbeddedResource,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddedResource {
    uri: String,
    #[serde(default)]
    text: Option<String>,
}

impl From<McpToolContent> for ToolOutputContent {
    fn from(content: McpToolContent) -> Self {
        match content {
            McpToolContent::Text { text } => ToolOutputContent::Text { text },
            McpToolContent::Image { data, mime_type } => {
                ToolOutputContent::Image { data, mime_type }
            }
            McpToolContent::Resource { resource } => ToolOutputContent::Resource {
                uri: resource.uri,
                text: resource.text,
            },
            McpToolContent::Unsupported => ToolOutputContent::Text {
                text: "[unsupported content]".to_string(),
            },
        }
    }
}

#[derive(Deserialize)]
struct ToolsListResult {
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct ToolCallResult {
    #[serde(default)]
    content: Vec<McpToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

/// Session with a single MCP server over any transport.
pub struct McpSession {
    name: String,
    transport: Box<dyn Transport>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

impl McpSession {
    /// Open the transport the config entry asks for. The handshake is left
    /// to [`ToolSession::initialize`].
    pub async fn open(name: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let transport: Box<dyn Transport> = match config.transport(name)? {
            ServerTransport::StreamableHttp { url } if config.transport.is_none() => {
                Box::new(HttpWithSseFallback::new(name, url, config.timeout_ms)?)
            }
            ServerTransport::StreamableHttp { url } => Box::new(StreamableHttpTransport::new(
                name,
                url,
                config.timeout_ms,
            )?),
            ServerTransport::Sse { url } => {
                Box::new(SseTransport::connect(name, url, config.timeout_ms).await?)
            }
            ServerTransport::Stdio { command, args } => Box::new(StdioTransport::spawn(
                name,
                command,
                args,
                &config.env,
                config.timeout_ms,
            )?),
        };
        Ok(Self::with_transport(name, transport))
    }

    pub(crate) fn with_transport(name: &str, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            transport,
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_ready(&self) -> Result<(), ToolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ToolError::Closed {
                server: self.name.clone(),
            });
        }
        if !self.initialized.load(Ordering::Acquire) {
            return Err(ToolError::NotInitialized {
                server: self.name.clone(),
            });
        }
        Ok(())
    }

    async fn handshake(&self) -> Result<(), McpError> {
        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "conduit",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self
            .transport
            .send_request("initialize", Some(init_params))
            .await?
            .into_result(&self.name)?;
        if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
            tracing::debug!(server = %self.name, "Negotiated MCP protocol {version}");
        }

        self.transport
            .send_notification("notifications/initialized", None)
            .await
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
            let result = self
                .transport
                .send_request("tools/list", params)
                .await?
                .into_result(&self.name)?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| ToolDescriptor {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        tracing::warn!(server = %self.name, "tools/list kept paginating; using the first {MAX_LIST_PAGES} pages");
        Ok(tools)
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });

        let result = self
            .transport
            .send_request("tools/call", Some(params))
            .await?
            .into_result(&self.name)?;

        let call_result: ToolCallResult = serde_json::from_value(result)
            .map_err(|e| McpError::Protocol(format!("Failed to parse tools/call result: {e}")))?;

        Ok(ToolOutput {
            content: call_result.content.into_iter().map(Into::into).collect(),
            is_error: call_result.is_error,
        })
    }
}

impl ToolSession for McpSession {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn initialize(&self) -> SessionFuture<'_, Result<(), ToolError>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(ToolError::Closed {
                    server: self.name.clone(),
                });
            }
            if self.initialized.load(Ordering::Acquire) {
                return Ok(());
            }
            self.handshake().await?;
            self.initialized.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn list_tools(&self) -> SessionFuture<'_, Result<Vec<ToolDescriptor>, ToolError>> {
        Box::pin(async move {
            self.ensure_ready()?;
            Ok(self.fetch_tools().await?)
        })
    }

    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: serde_json::Value,
    ) -> SessionFuture<'a, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            self.ensure_ready()?;
            tracing::debug!(server = %self.name, tool = name, "tools/call");
            Ok(self.invoke(name, arguments).await?)
        })
    }

    fn close(&self) -> SessionFuture<'_, ()> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.transport.shutdown().await;
            tracing::debug!(server = %self.name, "MCP session closed");
        })
    }
}
