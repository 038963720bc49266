//! Stdio transport: a child process speaking newline-delimited JSON-RPC.

use super::{PendingRequests, Transport, TransportFuture};
use crate::error::McpError;
use crate::jsonrpc::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, reply_to_server_request,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

/// Async stdio transport for communicating with an MCP server process.
pub struct StdioTransport {
    server: String,
    next_id: AtomicU64,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    pending: PendingRequests,
    tasks: Vec<JoinHandle<()>>,
    child: Arc<Mutex<Child>>,
    timeout_ms: u64,
}

impl StdioTransport {
    /// Spawn a child process and start background reader/writer tasks.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: command.to_string(),
            source: e,
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol(format!(
                "'{command}' was spawned without piped stdio"
            )));
        };
        let stderr = child.stderr.take();

        let pending = PendingRequests::default();
        let mut tasks = Vec::with_capacity(3);

        // Writer: drains the channel into the child's stdin, one line per message
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        tasks.push(tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                if stdin.write_all(msg.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        }));

        // Reader: routes responses to waiters and answers server requests
        let reader_pending = pending.clone();
        // Weak so that shutdown's drop of the real sender still closes stdin
        let reply_tx = write_tx.downgrade();
        let reader_server = server.to_string();
        tasks.push(tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let msg: JsonRpcResponse = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!(server = %reader_server, "Unparseable MCP message: {e}: {line}");
                        continue;
                    }
                };
                if msg.is_server_request() {
                    let reply = reply_to_server_request(&msg).to_string();
                    let Some(tx) = reply_tx.upgrade() else { break };
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                } else if msg.method.is_some() {
                    tracing::debug!(server = %reader_server, "MCP notification: {:?}", msg.method);
                } else if !reader_pending.complete(msg).await {
                    tracing::debug!(server = %reader_server, "Dropped response with no waiter");
                }
            }
            // Child closed stdout: nothing more will arrive
            reader_pending.fail_all().await;
        }));

        // Server stderr goes to the log rather than the user's terminal
        if let Some(stderr) = stderr {
            let stderr_server = server.to_string();
            tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %stderr_server, "stderr: {line}");
                }
            }));
        }

        Ok(Self {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            write_tx: Mutex::new(Some(write_tx)),
            pending,
            tasks,
            child: Arc::new(Mutex::new(child)),
            timeout_ms,
        })
    }

    async fn write(&self, line: String) -> Result<(), McpError> {
        let tx = self
            .write_tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Protocol(format!("'{}' is shut down", self.server)))?;
        tx.send(line)
            .await
            .map_err(|_| McpError::Protocol("Writer channel closed".to_string()))
    }
}

impl Transport for StdioTransport {
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> TransportFuture<'a, JsonRpcResponse> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let serialized = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

            let rx = self.pending.register(id).await;
            if let Err(e) = self.write(serialized).await {
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
            let serialized = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
            self.write(serialized).await
        })
    }

    /// Close stdin, give the child five seconds to exit, then kill it.
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            // Dropping the only sender ends the writer task, which closes stdin
            if self.write_tx.lock().await.take().is_none() {
                return;
            }

            let graceful = tokio::time::timeout(Duration::from_secs(5), async {
                let mut child = self.child.lock().await;
                let _ = child.wait().await;
            })
            .await;

            if graceful.is_err() {
                let mut child = self.child.lock().await;
                let _ = child.kill().await;
            }

            for task in &self.tasks {
                task.abort();
            }
            self.pending.fail_all().await;
        })
    }
}
