//! Legacy HTTP+SSE transport.
//!
//! The client holds a GET event stream open. The server's first event
//! (`endpoint`) names the URL that requests are POSTed to; responses come
//! back as `message` events on the stream.

use super::{PendingRequests, Transport, TransportFuture};
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
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Async SSE transport for one remote MCP server.
pub struct SseTransport {
    server: String,
    client: reqwest::Client,
    endpoint: reqwest::Url,
    next_id: AtomicU64,
    pending: PendingRequests,
    reader: JoinHandle<()>,
    closed: AtomicBool,
    timeout_ms: u64,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its
    /// message endpoint.
    pub async fn connect(server: &str, url: &str, timeout_ms: u64) -> Result<Self, McpError> {
        let network = |e: reqwest::Error| McpError::Network {
            server: server.to_string(),
            message: e.to_string(),
        };
        let base = reqwest::Url::parse(url)
            .map_err(|e| McpError::Protocol(format!("invalid URL '{url}': {e}")))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(network)?;

        let response = client
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Http {
                server: server.to_string(),
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(McpError::Protocol(format!(
                "'{server}' answered with '{content_type}' instead of an event stream"
            )));
        }

        let pending = PendingRequests::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(
            server.to_string(),
            client.clone(),
            base,
            response,
            pending.clone(),
            endpoint_tx,
        ));

        let endpoint = match tokio::time::timeout(Duration::from_millis(timeout_ms), endpoint_rx)
            .await
        {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::Protocol(format!(
                    "'{server}' closed the event stream before naming an endpoint"
                )));
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout {
                    name: server.to_string(),
                    timeout_ms,
                });
            }
        };
        tracing::debug!(server, %endpoint, "SSE message endpoint");

        Ok(Self {
            server: server.to_string(),
            client,
            endpoint,
            next_id: AtomicU64::new(1),
            pending,
            reader,
            closed: AtomicBool::new(false),
            timeout_ms,
        })
    }

    async fn post(&self, body: String) -> Result<(), McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::Protocol(format!("'{}' is shut down", self.server)));
        }
        post_message(&self.client, &self.server, self.endpoint.clone(), body).await
    }
}

async fn post_message(
    client: &reqwest::Client,
    server: &str,
    endpoint: reqwest::Url,
    body: String,
) -> Result<(), McpError> {
    let response = client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| McpError::Network {
            server: server.to_string(),
            message: e.to_string(),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(McpError::Http {
            server: server.to_string(),
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }
    Ok(())
}

/// Background reader for the GET stream.
async fn read_events(
    server: String,
    client: reqwest::Client,
    base: reqwest::Url,
    response: reqwest::Response,
    pending: PendingRequests,
    endpoint_tx: oneshot::Sender<reqwest::Url>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut endpoint: Option<reqwest::Url> = None;
    let mut stream = response.bytes_stream();
    let mut buffer = SseEventBuffer::default();

    loop {
        let (events, exhausted) = match stream.next().await {
            Some(Ok(chunk)) => (buffer.push(&chunk), false),
            Some(Err(e)) => {
                tracing::warn!(server = %server, "SSE stream failed: {e}");
                break;
            }
            None => (buffer.finish(), true),
        };

        for event in events {
            if event.event.as_deref() == Some("endpoint") {
                match base.join(event.data.trim()) {
                    Ok(url) => {
                        endpoint = Some(url.clone());
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(url);
                        }
                    }
                    Err(e) => tracing::warn!(server = %server, "Bad SSE endpoint: {e}"),
                }
                continue;
            }
            if !event.is_message() {
                continue;
            }

            let msg: JsonRpcResponse = match serde_json::from_str(&event.data) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(server = %server, "Unparseable MCP event: {e}");
                    continue;
                }
            };
            if msg.is_server_request() {
                if let Some(url) = endpoint.clone() {
                    let body = reply_to_server_request(&msg).to_string();
                    if let Err(e) = post_message(&client, &server, url, body).await {
                        tracing::debug!(server = %server, "Failed to answer server request: {e}");
                    }
                }
            } else if msg.method.is_none() && !pending.complete(msg).await {
                tracing::debug!(server = %server, "Dropped response with no waiter");
            }
        }

        if exhausted {
            break;
        }
    }

    pending.fail_all().await;
}

impl Transport for SseTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

            let rx = self.pending.register(id).await;
            if let Err(e) = self.post(body).await {
                self.pending.forget(id).await;
                return Err(e);
            }
            self.pending.wait(id, rx, method, self.timeout_ms).await
        })
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.post(body).await
        })
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            self.reader.abort();
            self.pending.fail_all().await;
        })
    }
}
