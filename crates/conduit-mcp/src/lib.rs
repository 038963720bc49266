//! MCP (Model Context Protocol) client side of Conduit.
//!
//! Tool servers are reached either as child processes speaking
//! newline-delimited JSON-RPC 2.0 over stdio, or over HTTP (streamable HTTP
//! or the older SSE binding). [`McpManager`] connects every active server,
//! and its [`ToolRegistry`] routes each tool name to the session that serves it.

pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod manager;
pub mod registry;
pub mod session;
mod transport;

pub use config::{McpConfig, McpServerConfig, ServerTransport, TransportHint};
pub use error::McpError;
pub use manager::{McpManager, SessionConnector, TransportConnector};
pub use registry::{CollisionPolicy, ToolRegistry};
pub use session::McpSession;
