//! Streamable HTTP with a fallback to the legacy SSE binding.
//!
//! Used for `baseUrl` entries that don't name a binding. The first exchange
//! is POSTed as streamable HTTP; if the server turns that down with 400, 404
//! or 405 before any request has succeeded, it is treated as an SSE-only
//! server and every further message goes over an SSE connection to the same
//! URL.

use super::{SseTransport, StreamableHttpTransport, Transport, TransportFuture};
use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;

pub struct HttpWithSseFallback {
    server: String,
    url: String,
    timeout_ms: u64,
    http: StreamableHttpTransport,
    sse: OnceCell<SseTransport>,
    /// Set once streamable HTTP has answered a request.
    confirmed: AtomicBool,
}

impl HttpWithSseFallback {
    pub fn new(server: &str, url: &str, timeout_ms: u64) -> Result<Self, McpError> {
        Ok(Self {
            server: server.to_string(),
            url: url.to_string(),
            timeout_ms,
            http: StreamableHttpTransport::new(server, url, timeout_ms)?,
            sse: OnceCell::new(),
            confirmed: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    fn using_sse(&self) -> bool {
        self.sse.initialized()
    }

    fn active(&self) -> &dyn Transport {
        match self.sse.get() {
            Some(sse) => sse as &dyn Transport,
            None => &self.http,
        }
    }
}

impl Transport for HttpWithSseFallback {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        Box::pin(async move {
            if let Some(sse) = self.sse.get() {
                return sse.send_request(method, params).await;
            }

            match self.http.send_request(method, params.clone()).await {
                Err(McpError::Http { status, .. })
                    if matches!(status, 400 | 404 | 405)
                        && !self.confirmed.load(Ordering::Acquire) =>
                {
                    tracing::info!(
                        "'{}' refused streamable HTTP ({status}), switching to SSE",
                        self.server
                    );
                    let sse = self
                        .sse
                        .get_or_try_init(|| {
                            SseTransport::connect(&self.server, &self.url, self.timeout_ms)
                        })
                        .await?;
                    sse.send_request(method, params).await
                }
                result => {
                    if result.is_ok() {
                        self.confirmed.store(true, Ordering::Release);
                    }
                    result
                }
            }
        })
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, ()> {
        self.active().send_notification(method, params)
    }

    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.active().shutdown()
    }
}
