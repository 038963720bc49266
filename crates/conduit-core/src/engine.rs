//! The conversation loop: stream a response, dispatch its tool calls, repeat.

use std::sync::Arc;

use conduit_mcp::ToolRegistry;
use conduit_types::provider::Provider;
use conduit_types::{
    ChatCompletionRequest, ConduitError, Message, ToolCall, ToolInvocation, ToolOutput,
    ToolResult, summarize_json, truncate_for_display,
};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{AggregatedResponse, ToolCallAggregator};
use crate::history::{ConversationHistory, DEFAULT_HISTORY_WINDOW};

/// Default bound on tool rounds per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 50;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A text delta from the model's response.
    TextDelta(String),
    /// A tool is about to be called.
    ToolStart { name: String, arguments: String },
    /// A tool call finished. `narration` is the one-line account of it.
    ToolEnd {
        name: String,
        narration: String,
        is_error: bool,
    },
}

enum Phase {
    Streaming,
    Dispatching(AggregatedResponse),
}

/// Drives the model and the tool servers until the model answers in text.
pub struct ConversationEngine {
    provider: Arc<dyn Provider>,
    model: String,
    history_window: usize,
    max_tool_rounds: usize,
}

impl ConversationEngine {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            history_window: DEFAULT_HISTORY_WINDOW,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn max_tool_rounds(&self) -> usize {
        self.max_tool_rounds
    }

    /// Run one turn against `history`, whose message at `turn_start` is the
    /// user message being answered.
    ///
    /// Returns the final assistant message, or `None` when the model produced
    /// neither text nor tool calls. On error the caller is expected to roll
    /// `history` back; messages appended by completed rounds are still there.
    pub async fn run<F>(
        &self,
        history: &mut ConversationHistory,
        registry: &ToolRegistry,
        turn_start: usize,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<Option<Message>, ConduitError>
    where
        F: FnMut(EngineEvent),
    {
        let mut rounds = 0;
        let mut phase = Phase::Streaming;

        loop {
            phase = match phase {
                Phase::Streaming => {
                    let response = self
                        .stream_response(history, registry, turn_start, cancel, &mut on_event)
                        .await?;

                    if response.invocations.is_empty() {
                        if response.content.is_empty() {
                            tracing::debug!("Model returned neither text nor tool calls");
                            return Ok(None);
                        }
                        let message = Message::assistant(response.content);
                        history.push(message.clone());
                        return Ok(Some(message));
                    }

                    if rounds >= self.max_tool_rounds {
                        return Err(ConduitError::ToolLoopLimit { rounds });
                    }
                    Phase::Dispatching(response)
                }
                Phase::Dispatching(response) => {
                    rounds += 1;
                    tracing::debug!(
                        "Tool round {rounds}: {} call(s)",
                        response.invocations.len()
                    );
                    let results = self
                        .dispatch(&response.invocations, registry, cancel, &mut on_event)
                        .await?;

                    let tool_calls = response
                        .invocations
                        .iter()
                        .map(|call| {
                            let arguments = if call.raw_arguments.trim().is_empty() {
                                "{}"
                            } else {
                                call.raw_arguments.as_str()
                            };
                            ToolCall::function(&call.id, &call.name, arguments)
                        })
                        .collect();
                    history.push(Message::assistant_with_tools(response.content, tool_calls));
                    for result in results {
                        history.push(Message::tool_result(result));
                    }
                    Phase::Streaming
                }
            };
        }
    }

    /// One streamed model response, reassembled.
    async fn stream_response<F>(
        &self,
        history: &ConversationHistory,
        registry: &ToolRegistry,
        turn_start: usize,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<AggregatedResponse, ConduitError>
    where
        F: FnMut(EngineEvent),
    {
        let definitions = registry.definitions();
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: history
                .window(self.history_window, Some(turn_start))
                .to_vec(),
            tools: if definitions.is_empty() {
                None
            } else {
                Some(definitions)
            },
            stream: true,
        };
        tracing::debug!(
            "Requesting completion from {} ({} messages, {} tools)",
            self.provider.name(),
            request.messages.len(),
            request.tools.as_ref().map_or(0, Vec::len)
        );

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConduitError::Cancelled),
            stream = self.provider.stream_completion(&request) => stream?,
        };

        let mut aggregator = ToolCallAggregator::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConduitError::Cancelled),
                item = stream.next() => match item {
                    Some(Ok(fragment)) => {
                        aggregator.push(fragment, |text| {
                            on_event(EngineEvent::TextDelta(text.to_string()));
                        });
                    }
                    Some(Err(e)) => return Err(ConduitError::Api(e)),
                    None => break,
                }
            }
        }

        aggregator.finish()
    }

    /// Call each tool in order, one at a time.
    async fn dispatch<F>(
        &self,
        invocations: &[ToolInvocation],
        registry: &ToolRegistry,
        cancel: &CancellationToken,
        on_event: &mut F,
    ) -> Result<Vec<ToolResult>, ConduitError>
    where
        F: FnMut(EngineEvent),
    {
        let mut results = Vec::with_capacity(invocations.len());
        for call in invocations {
            let session = registry.get(&call.name).ok_or_else(|| ConduitError::Routing {
                name: call.name.clone(),
            })?;

            let args_summary = summarize_json(&call.arguments, 3, 60);
            on_event(EngineEvent::ToolStart {
                name: call.name.clone(),
                arguments: args_summary.clone(),
            });

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ConduitError::Cancelled),
                outcome = session.call_tool(&call.name, call.arguments.clone()) => outcome,
            };
            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    tracing::warn!(
                        "Tool '{}' on '{}' failed: {e}",
                        call.name,
                        session.server_name()
                    );
                    ToolOutput::error(e.to_string())
                }
            };

            let content = output.to_text();
            on_event(EngineEvent::ToolEnd {
                name: call.name.clone(),
                narration: format!(
                    "calling tool {} with args {args_summary} ... result {}",
                    call.name,
                    truncate_for_display(&content, 200)
                ),
                is_error: output.is_error,
            });

            results.push(ToolResult {
                tool_call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                is_error: output.is_error,
            });
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::provider::FragmentStream;
    use conduit_types::{ApiError, ResponseFragment};
    use futures_util::stream;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Replays one scripted response per request and records each request.
    struct ScriptedProvider {
        responses: Mutex<Vec<Vec<ResponseFragment>>>,
        requests: Mutex<Vec<ChatCompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(mut responses: Vec<Vec<ResponseFragment>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Provider for ScriptedProvider {
        fn stream_completion<'a>(
            &'a self,
            request: &'a ChatCompletionRequest,
        ) -> Pin<Box<dyn Future<Output = Result<FragmentStream, ApiError>> + Send + 'a>> {
            self.requests.lock().unwrap().push(request.clone());
            let fragments = self.responses.lock().unwrap().pop().unwrap_or_default();
            Box::pin(async move {
                Ok(Box::pin(stream::iter(fragments.into_iter().map(Ok::<_, ApiError>))) as FragmentStream)
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn start(history: &mut ConversationHistory, text: &str) -> usize {
        history.push(Message::user(text));
        history.len() - 1
    }

    #[tokio::test]
    async fn text_answer_ends_turn_in_one_step() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            ResponseFragment::text("Hel"),
            ResponseFragment::text("lo"),
        ]]));
        let engine = ConversationEngine::new(provider.clone(), "gpt-test");
        let mut history = ConversationHistory::new();
        let turn_start = start(&mut history, "hi");

        let mut deltas = Vec::new();
        let answer = engine
            .run(
                &mut history,
                &ToolRegistry::new(),
                turn_start,
                &CancellationToken::new(),
                |event| {
                    if let EngineEvent::TextDelta(text) = event {
                        deltas.push(text);
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(answer, Some(Message::assistant("Hello")));
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert_eq!(history.len(), 2);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].tools.is_none());
        assert!(requests[0].stream);
        assert_eq!(requests[0].model, "gpt-test");
    }

    #[tokio::test]
    async fn empty_response_is_no_progress() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![]]));
        let engine = ConversationEngine::new(provider, "m");
        let mut history = ConversationHistory::new();
        let turn_start = start(&mut history, "hi");

        let answer = engine
            .run(
                &mut history,
                &ToolRegistry::new(),
                turn_start,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap();
        assert!(answer.is_none());
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_routing_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![ResponseFragment::tool_call(
            conduit_types::ToolCallDelta {
                index: 0,
                id: Some("c1".into()),
                name: Some("missing".into()),
                arguments: Some("{}".into()),
            },
        )]]));
        let engine = ConversationEngine::new(provider, "m");
        let mut history = ConversationHistory::new();
        let turn_start = start(&mut history, "hi");

        let err = engine
            .run(
                &mut history,
                &ToolRegistry::new(),
                turn_start,
                &CancellationToken::new(),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Routing { name } if name == "missing"));
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_streaming() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![ResponseFragment::text("x")]]));
        let engine = ConversationEngine::new(provider, "m");
        let mut history = ConversationHistory::new();
        let turn_start = start(&mut history, "hi");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .run(&mut history, &ToolRegistry::new(), turn_start, &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Cancelled));
    }

    #[test]
    fn window_has_a_floor_of_one() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let engine = ConversationEngine::new(provider, "m").with_history_window(0);
        assert_eq!(engine.history_window, 1);
        assert_eq!(engine.provider_name(), "scripted");
        assert_eq!(engine.model(), "m");
    }
}
