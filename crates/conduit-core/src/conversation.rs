//! Turn control: user submissions in, streamed answers out.

use conduit_mcp::McpManager;
use conduit_types::{ConduitError, Message, ToolDescriptor};
use tokio_util::sync::CancellationToken;

use crate::engine::{ConversationEngine, EngineEvent};
use crate::history::ConversationHistory;

/// One conversation with its tool servers and full history.
pub struct Conversation {
    engine: ConversationEngine,
    manager: McpManager,
    history: ConversationHistory,
    /// Index of the first user message not yet answered.
    turn_start: Option<usize>,
    final_message: Option<Message>,
}

impl Conversation {
    pub fn new(engine: ConversationEngine, manager: McpManager) -> Self {
        Self {
            engine,
            manager,
            history: ConversationHistory::new(),
            turn_start: None,
            final_message: None,
        }
    }

    /// Append a user message. Nothing is sent until [`Self::run_turn`].
    pub fn submit_user_message(&mut self, text: impl Into<String>) {
        if self.turn_start.is_none() {
            self.turn_start = Some(self.history.len());
        }
        self.history.push(Message::user(text));
    }

    /// Answer the pending user message(s).
    ///
    /// Connects the tool servers on first use. `on_text` receives every text
    /// delta, `on_narration` one line per finished tool call. If the turn
    /// fails, history goes back to how it was before the user message was
    /// submitted.
    pub async fn run_turn<T, N>(
        &mut self,
        mut on_text: T,
        mut on_narration: N,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, ConduitError>
    where
        T: FnMut(&str),
        N: FnMut(&str),
    {
        let Some(turn_start) = self.turn_start.take() else {
            tracing::debug!("No pending user message");
            return Ok(None);
        };

        self.manager.connect().await;

        let result = self
            .engine
            .run(
                &mut self.history,
                self.manager.registry(),
                turn_start,
                cancel,
                |event| match event {
                    EngineEvent::TextDelta(text) => on_text(&text),
                    EngineEvent::ToolStart { name, arguments } => {
                        tracing::debug!("Calling {name} ({arguments})");
                    }
                    EngineEvent::ToolEnd { narration, .. } => on_narration(&narration),
                },
            )
            .await;

        match result {
            Ok(answer) => {
                if let Some(message) = &answer {
                    self.final_message = Some(message.clone());
                }
                Ok(answer)
            }
            Err(e) => {
                tracing::debug!("Turn failed, rolling history back to {turn_start}: {e}");
                self.history.truncate(turn_start);
                Err(e)
            }
        }
    }

    /// Submit `text` and run the turn it starts.
    pub async fn send<T, N>(
        &mut self,
        text: impl Into<String>,
        on_text: T,
        on_narration: N,
        cancel: &CancellationToken,
    ) -> Result<Option<Message>, ConduitError>
    where
        T: FnMut(&str),
        N: FnMut(&str),
    {
        self.submit_user_message(text);
        self.run_turn(on_text, on_narration, cancel).await
    }

    /// The most recent final answer.
    pub fn final_message(&self) -> Option<&Message> {
        self.final_message.as_ref()
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Tools from every connected server. Empty until the first turn or
    /// [`Self::connect`].
    pub fn tools(&self) -> &[ToolDescriptor] {
        self.manager.registry().descriptors()
    }

    /// Connected servers and their tool counts.
    pub fn servers(&self) -> Vec<(&str, usize)> {
        self.manager.server_summary()
    }

    pub async fn connect(&mut self) {
        self.manager.connect().await;
    }

    /// Forget the history. Connections stay up.
    pub fn clear(&mut self) {
        self.history.clear();
        self.turn_start = None;
        self.final_message = None;
    }

    /// Close every tool server session.
    pub async fn shutdown(&mut self) {
        self.manager.shutdown().await;
    }
}
