//! JSON-RPC 2.0 framing shared by every MCP transport.

use serde::{Deserialize, Serialize};

use crate::error::McpError;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Any message a server sends: a response to one of ours, or a request or
/// notification of its own (those carry `method`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The numeric id of a response to one of our requests.
    ///
    /// `None` for server-initiated messages and for ids we never issue.
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        self.id.as_ref().and_then(|id| id.as_u64())
    }

    /// True when the server is asking us something and expects an answer.
    pub fn is_server_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }

    /// Unwrap the result, turning a JSON-RPC error object into [`McpError::JsonRpc`].
    pub fn into_result(self, server: &str) -> Result<serde_json::Value, McpError> {
        if let Some(err) = self.error {
            return Err(McpError::JsonRpc {
                server: server.to_string(),
                code: err.code,
                message: err.message,
            });
        }
        self.result.ok_or_else(|| {
            McpError::Protocol(format!(
                "response from '{server}' has neither result nor error"
            ))
        })
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Our reply to a request the server sent us.
///
/// `ping` is answered with an empty result; anything else is refused with
/// "method not found", since this client offers no capabilities.
pub fn reply_to_server_request(request: &JsonRpcResponse) -> serde_json::Value {
    let id = request.id.clone().unwrap_or(serde_json::Value::Null);
    match request.method.as_deref() {
        Some("ping") => serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}}),
        method => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": -32601,
                "message": format!("Method not found: {}", method.unwrap_or_default()),
            }
        }),
    }
}
