//! MCP manager: connects every configured server and owns their sessions.

use crate::config::{McpConfig, McpServerConfig};
use crate::error::McpError;
use crate::registry::{CollisionPolicy, ToolRegistry};
use crate::session::McpSession;
use conduit_types::ToolSession;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Opens a session for one server config entry.
///
/// The manager goes through this seam so tests can stand in sessions that
/// need no process or network.
pub trait SessionConnector: Send + Sync {
    fn open<'a>(
        &'a self,
        name: &'a str,
        config: &'a McpServerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolSession>, McpError>> + Send + 'a>>;
}

/// Opens real [`McpSession`]s over stdio or HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportConnector;

impl SessionConnector for TransportConnector {
    fn open<'a>(
        &'a self,
        name: &'a str,
        config: &'a McpServerConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn ToolSession>, McpError>> + Send + 'a>> {
        Box::pin(async move {
            let session = McpSession::open(name, config).await?;
            Ok(Arc::new(session) as Arc<dyn ToolSession>)
        })
    }
}

/// Manages connections to multiple MCP servers.
pub struct McpManager {
    config: McpConfig,
    connector: Arc<dyn SessionConnector>,
    registry: ToolRegistry,
    /// Open sessions in acquisition order, with their registered tool counts.
    sessions: Vec<(Arc<dyn ToolSession>, usize)>,
    connected: bool,
}

impl McpManager {
    pub fn new(config: McpConfig, policy: CollisionPolicy) -> Self {
        Self::with_connector(config, policy, Arc::new(TransportConnector))
    }

    pub fn with_connector(
        config: McpConfig,
        policy: CollisionPolicy,
        connector: Arc<dyn SessionConnector>,
    ) -> Self {
        Self {
            config,
            connector,
            registry: ToolRegistry::with_policy(policy),
            sessions: Vec::new(),
            connected: false,
        }
    }

    /// Connect every active server, in declaration order.
    ///
    /// Does nothing if already connected. Servers that fail are logged and
    /// skipped; the rest stay usable.
    pub async fn connect(&mut self) {
        if self.connected {
            return;
        }
        self.registry.clear();

        for (name, server) in &self.config.servers {
            if !server.is_active {
                tracing::debug!("Skipping inactive MCP server '{name}'");
                continue;
            }

            let session = match self.connector.open(name, server).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Failed to connect MCP server '{name}': {e}");
                    continue;
                }
            };

            match Self::discover(&mut self.registry, &session).await {
                Ok(count) => {
                    tracing::info!("MCP server '{name}' connected ({count} tools)");
                    self.sessions.push((session, count));
                }
                Err(e) => {
                    tracing::warn!("MCP server '{name}' is unavailable: {e}");
                    session.close().await;
                }
            }
        }

        self.connected = true;
    }

    async fn discover(
        registry: &mut ToolRegistry,
        session: &Arc<dyn ToolSession>,
    ) -> Result<usize, McpError> {
        let wrap = |source| McpError::Session {
            server: session.server_name().to_string(),
            source,
        };
        session.initialize().await.map_err(wrap)?;
        let tools = session.list_tools().await.map_err(wrap)?;
        registry.register(Arc::clone(session), tools)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Number of connected servers.
    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// Connected servers and how many tools each registered.
    pub fn server_summary(&self) -> Vec<(&str, usize)> {
        self.sessions
            .iter()
            .map(|(s, count)| (s.server_name(), *count))
            .collect()
    }

    /// Close every session, newest first. A later `connect` starts over.
    pub async fn shutdown(&mut self) {
        self.registry.clear();
        while let Some((session, _)) = self.sessions.pop() {
            session.close().await;
        }
        self.connected = false;
    }
}
