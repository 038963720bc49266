//! Streamable HTTP transport: every message is a POST to one endpoint, and
//! the reply comes back either as a JSON body or as an event stream.

use super::{Transport, TransportFuture};
use crate::error::McpError;
use crate::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, reply_to_server_request,
};
use conduit_types::sse::{SseEventBuffer, is_event_stream_content_type};
use futures_util::StreamExt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Async streamable HTTP transport for one remote MCP server.
pub struct StreamableHttpTransport {
    server: String,
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl StreamableHttpTransport {
    pub fn new(server: &str, url: &str, timeout_ms: u64) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| McpError::Network {
                server: server.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            server: server.to_string(),
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
            closed: AtomicBool::new(false),
            timeout_ms,
        })
    }

    fn network_error(&self, err: reqwest::Error) -> McpError {
        McpError::Network {
            server: self.server.clone(),
            message: err.to_string(),
        }
    }

    /// POST one JSON-RPC message with the session headers attached.
    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Protocol(format!("'{}' is shut down", self.server)));
        }

        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(session_id) = self.session_id.read().await.as_deref() {
            request = request.header(SESSION_HEADER, session_id);
        }
        if let Some(version) = self.protocol_version.read().await.as_deref() {
            request = request.header(PROTOCOL_VERSION_HEADER, version);
        }

        let response = request.send().await.map_err(|e| self.network_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(McpError::Http {
                server: self.server.clone(),
                status: status.as_u16(),
                message,
            });
        }

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }
        Ok(response)
    }

    async fn exchange(&self, id: u64, body: String) -> Result<JsonRpcResponse, McpError> {
        let response = self.post(body).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if is_event_stream_content_type(&content_type) {
            self.read_event_stream(id, response).await
        } else {
            let body = response.bytes().await.map_err(|e| self.network_error(e))?;
            match_response(&body, id)
        }
    }

    /// Read events until the response to `id` arrives, answering any server
    /// requests interleaved before it.
    async fn read_event_stream(
        &self,
        id: u64,
        response: reqwest::Response,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = response.bytes_stream();
        let mut buffer = SseEventBuffer::default();

        loop {
            let (events, exhausted) = match stream.next().await {
                Some(chunk) => (buffer.push(&chunk.map_err(|e| self.network_error(e))?), false),
                None => (buffer.finish(), true),
            };

            for event in events.into_iter().filter(|e| e.is_message()) {
                let msg: JsonRpcResponse = match serde_json::from_str(&event.data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(server = %self.server, "Unparseable MCP event: {e}");
                        continue;
                    }
                };
                if msg.response_id() == Some(id) {
                    return Ok(msg);
                }
                if msg.is_server_request() {
                    self.reply(&msg).await;
                }
            }

            if exhausted {
                return Err(McpError::Protocol(format!(
                    "event stream from '{}' ended without a response",
                    self.server
                )));
            }
        }
    }

    async fn reply(&self, request: &JsonRpcResponse) {
        let body = reply_to_server_request(request).to_string();
        if let Err(e) = self.post(body).await {
            tracing::debug!(server = %self.server, "Failed to answer server request: {e}");
        }
    }
}

/// Pick the response to `id` out of a JSON body, which may be a single
/// message or a batch.
fn match_response(body: &[u8], id: u64) -> Result<JsonRpcResponse, McpError> {
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let candidates = match value {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };
    for candidate in candidates {
        let msg: JsonRpcResponse = serde_json::from_value(candidate)?;
        if msg.response_id() == Some(id) {
            return Ok(msg);
        }
    }
    Err(McpError::Protocol(format!("no response with id {id} in body")))
}

impl Transport for StreamableHttpTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

            let response = tokio::time::timeout(
                Duration::from_millis(self.timeout_ms),
                self.exchange(id, body),
            )
            .await
            .map_err(|_| McpError::Timeout {
                name: method.to_string(),
                timeout_ms: self.timeout_ms,
            })??;

            // Later requests must carry the version the server agreed to
            if method == "initialize" {
                if let Some(version) = response
                    .result
                    .as_ref()
                    .and_then(|r| r.get("protocolVersion"))
                    .and_then(|v| v.as_str())
                {
                    *self.protocol_version.write().await = Some(version.to_string());
                }
            }
            Ok(response)
        })
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            // Servers answer notifications with 202 Accepted and no body
            tokio::time::timeout(Duration::from_millis(self.timeout_ms), self.post(body))
                .await
                .map_err(|_| McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms: self.timeout_ms,
                })??;
            Ok(())
        })
    }

    /// End the server-side session with a DELETE, if one was issued.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            let Some(session_id) = self.session_id.write().await.take() else {
                return;
            };
            let result = tokio::time::timeout(
                Duration::from_secs(5),
                self.client
                    .delete(&self.url)
                    .header(SESSION_HEADER, session_id)
                    .send(),
            )
            .await;
            if !matches!(result, Ok(Ok(_))) {
                tracing::debug!(server = %self.server, "Session DELETE did not complete");
            }
        })
    }
}
