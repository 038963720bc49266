//! Tool routing: which session serves each tool name.

use crate::error::McpError;
use conduit_types::{ToolDefinition, ToolDescriptor, ToolSession};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// What to do when a second server declares a tool name already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// The later server takes over the name.
    #[default]
    LastWins,
    /// The later server is refused as a whole.
    Reject,
}

/// Maps tool names to the session that serves them, plus the catalog
/// offered to the model.
///
/// The catalog holds one descriptor per name, in first-seen order, with the
/// descriptor of whichever server currently owns the route.
#[derive(Default)]
pub struct ToolRegistry {
    routes: HashMap<String, Arc<dyn ToolSession>>,
    catalog: Vec<ToolDescriptor>,
    policy: CollisionPolicy,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    /// Route every tool in `tools` to `session`. Returns how many were
    /// registered.
    ///
    /// Under [`CollisionPolicy::Reject`] nothing is registered if any name is
    /// already owned by a different session.
    pub fn register(
        &mut self,
        session: Arc<dyn ToolSession>,
        tools: Vec<ToolDescriptor>,
    ) -> Result<usize, McpError> {
        if self.policy == CollisionPolicy::Reject {
            for tool in &tools {
                if let Some(existing) = self.routes.get(&tool.name) {
                    if !Arc::ptr_eq(existing, &session) {
                        return Err(McpError::ToolCollision {
                            tool: tool.name.clone(),
                            server: session.server_name().to_string(),
                            existing: existing.server_name().to_string(),
                        });
                    }
                }
            }
        }

        let count = tools.len();
        for tool in tools {
            let previous = self.routes.insert(tool.name.clone(), Arc::clone(&session));
            match previous {
                Some(previous) => {
                    if !Arc::ptr_eq(&previous, &session) {
                        tracing::warn!(
                            "Tool '{}' from '{}' replaces the one from '{}'",
                            tool.name,
                            session.server_name(),
                            previous.server_name()
                        );
                    }
                    if let Some(slot) = self.catalog.iter_mut().find(|t| t.name == tool.name) {
                        *slot = tool;
                    }
                }
                None => self.catalog.push(tool),
            }
        }
        Ok(count)
    }

    /// The session serving `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolSession>> {
        self.routes.get(name)
    }

    /// Name of the server that serves `name`.
    pub fn server_for(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(|s| s.server_name())
    }

    /// The catalog in the shape the completion request wants.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.iter().map(ToolDefinition::from).collect()
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.catalog
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Forget every route. Sessions themselves are not closed.
    pub fn clear(&mut self) {
        self.routes.clear();
        self.catalog.clear();
    }
}
