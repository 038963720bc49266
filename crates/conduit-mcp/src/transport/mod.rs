//! Transports that carry JSON-RPC between Conduit and a tool server.

mod fallback;
mod http;
mod sse;
mod stdio;

pub use fallback::HttpWithSseFallback;
pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, McpError>> + Send + 'a>>;

/// A bidirectional JSON-RPC channel to one server.
pub trait Transport: Send + Sync {
    /// Send a request and wait for the matching response.
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, JsonRpcResponse>;

    /// Send a notification (fire-and-forget, no response expected).
    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, ()>;

    /// Release the connection.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Requests awaiting a response, keyed by JSON-RPC id.
///
/// Used by the transports whose responses arrive on a separate channel from
/// the one requests are written to (stdio and SSE).
#[derive(Clone, Default)]
pub(crate) struct PendingRequests {
    inner: Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>,
}

impl PendingRequests {
    pub(crate) async fn register(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(id, tx);
        rx
    }

    /// Hand a response to whoever is waiting on its id. Returns false if
    /// nobody was.
    pub(crate) async fn complete(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.response_id() else {
            return false;
        };
        match self.inner.lock().await.remove(&id) {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Wait for the response to `id`, dropping the entry on timeout.
    pub(crate) async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<JsonRpcResponse>,
        method: &str,
        timeout_ms: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Protocol("Response channel dropped".to_string())),
            Err(_) => {
                self.inner.lock().await.remove(&id);
                Err(McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    /// Stop waiting for `id`, e.g. because the request never went out.
    pub(crate) async fn forget(&self, id: u64) {
        self.inner.lock().await.remove(&id);
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Drop every waiter, so their requests fail instead of hanging.
    pub(crate) async fn fail_all(&self) {
        self.inner.lock().await.clear();
    }
}
