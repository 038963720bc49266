//! Conversation history and the window of it sent to the model.

use conduit_types::{Message, Role};

/// Default number of messages submitted per request.
pub const DEFAULT_HISTORY_WINDOW: usize = 20;

/// Every message of the conversation, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Drop everything from `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.messages.truncate(len);
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// The suffix of history to submit: the last `max` messages, widened so
    /// it never starts after `turn_start`, then trimmed of leading tool
    /// results whose assistant message fell outside.
    pub fn window(&self, max: usize, turn_start: Option<usize>) -> &[Message] {
        let len = self.messages.len();
        let mut start = len.saturating_sub(max);
        if let Some(turn_start) = turn_start {
            start = start.min(turn_start.min(len));
        }
        while start < len && self.messages[start].role() == Role::Tool {
            start += 1;
        }
        &self.messages[start..]
    }
}
