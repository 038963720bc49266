//! Configuration types for MCP servers.
//!
//! Servers are declared in a JSON document of the form
//! `{"mcpServers": {"<id>": {...}}}`. Declaration order matters: when two
//! servers expose a tool with the same name, the later one wins, so the map is
//! read into an ordered list instead of a hash map.

use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::error::McpError;

fn default_timeout() -> u64 {
    30000
}

fn default_active() -> bool {
    true
}

/// Top-level MCP configuration: every declared server, in file order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpConfig {
    #[serde(
        default,
        rename = "mcpServers",
        alias = "servers",
        deserialize_with = "deserialize_ordered"
    )]
    pub servers: Vec<(String, McpServerConfig)>,
}

impl McpConfig {
    /// Parse the JSON server declaration document.
    pub fn from_json_str(json: &str) -> Result<Self, McpError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Servers that should be connected, in declaration order.
    pub fn active_servers(&self) -> impl Iterator<Item = &(String, McpServerConfig)> {
        self.servers.iter().filter(|(_, server)| server.is_active)
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Inactive servers are declared but never connected.
    #[serde(default = "default_active", alias = "enabled")]
    pub is_active: bool,
    /// HTTP endpoint of a remote server. Takes precedence over `command`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Command to run for a stdio server (e.g., "npx", "python").
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Which HTTP binding to use; inferred from the URL when absent.
    #[serde(default)]
    pub transport: Option<TransportHint>,
    /// Timeout for each request in milliseconds (default: 30000).
    #[serde(default = "default_timeout", alias = "timeout_ms")]
    pub timeout_ms: u64,
}

/// Explicit choice of HTTP binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportHint {
    StreamableHttp,
    Sse,
}

/// How to reach a server, resolved from its config entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTransport<'a> {
    StreamableHttp { url: &'a str },
    Sse { url: &'a str },
    Stdio { command: &'a str, args: &'a [String] },
}

impl McpServerConfig {
    /// A stdio server entry.
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            is_active: true,
            base_url: None,
            command: Some(command.into()),
            args,
            env: HashMap::new(),
            transport: None,
            timeout_ms: default_timeout(),
        }
    }

    /// An HTTP server entry.
    pub fn http(base_url: impl Into<String>) -> Self {
        Self {
            is_active: true,
            base_url: Some(base_url.into()),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            transport: None,
            timeout_ms: default_timeout(),
        }
    }

    /// Resolve the transport: a base URL wins over a command. URLs whose
    /// path ends in `/sse` use the SSE binding unless told otherwise. Any
    /// other URL without an explicit `transport` starts as streamable HTTP
    /// and drops to SSE if the server refuses the first POST.
    pub fn transport(&self, name: &str) -> Result<ServerTransport<'_>, McpError> {
        if let Some(url) = self.base_url.as_deref() {
            let hint = self.transport.unwrap_or_else(|| {
                if url.trim_end_matches('/').ends_with("/sse") {
                    TransportHint::Sse
                } else {
                    TransportHint::StreamableHttp
                }
            });
            return Ok(match hint {
                TransportHint::Sse => ServerTransport::Sse { url },
                TransportHint::StreamableHttp => ServerTransport::StreamableHttp { url },
            });
        }
        if let Some(command) = self.command.as_deref() {
            return Ok(ServerTransport::Stdio {
                command,
                args: &self.args,
            });
        }
        Err(McpError::NoTransport {
            name: name.to_string(),
        })
    }
}

fn deserialize_ordered<'de, D>(deserializer: D) -> Result<Vec<(String, McpServerConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedServers;

    impl<'de> Visitor<'de> for OrderedServers {
        type Value = Vec<(String, McpServerConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of server id to server settings")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut servers = Vec::new();
            while let Some((id, server)) = map.next_entry::<String, McpServerConfig>()? {
                servers.push((id, server));
            }
            Ok(servers)
        }
    }

    deserializer.deserialize_map(OrderedServers)
}
