//! Conversation engine and turn control for Conduit.

pub mod aggregator;
mod conversation;
mod engine;
pub mod history;
mod service;

pub use aggregator::{AggregatedResponse, PendingToolCall, ToolCallAggregator};
pub use conversation::Conversation;
pub use engine::{ConversationEngine, DEFAULT_MAX_TOOL_ROUNDS, EngineEvent};
pub use history::{ConversationHistory, DEFAULT_HISTORY_WINDOW};
pub use service::{ChatService, TurnHandle, TurnUpdate};
