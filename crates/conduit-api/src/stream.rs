//! Async stream that converts chat-completion SSE chunks into response fragments.

use conduit_types::sse::{SseEvent, SseEventBuffer};
use conduit_types::{ApiError, ResponseFragment, ToolCallDelta};
use futures_core::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// An async stream of [`ResponseFragment`]s from a streamed chat completion.
    ///
    /// Ends at `data: [DONE]` or at end of body, whichever comes first. A
    /// transport failure or an error payload is yielded once as `Err`, after
    /// which the stream ends.
    pub struct CompletionStream {
        #[pin]
        inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
        events: SseEventBuffer,
        queue: VecDeque<Result<ResponseFragment, ApiError>>,
        done: bool,
    }
}

impl CompletionStream {
    /// Create a new CompletionStream from a reqwest byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            events: SseEventBuffer::default(),
            queue: VecDeque::new(),
            done: false,
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<ResponseFragment, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    for event in this.events.push(&bytes) {
                        if !handle_event(event, &mut *this.queue) {
                            *this.done = true;
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(ApiError::Network(e.to_string()))));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    for event in this.events.finish() {
                        if !handle_event(event, &mut *this.queue) {
                            break;
                        }
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Queue whatever `event` produces. Returns false once the stream is over.
fn handle_event(event: SseEvent, queue: &mut VecDeque<Result<ResponseFragment, ApiError>>) -> bool {
    let data = event.data.trim();
    if data == "[DONE]" {
        return false;
    }
    if data.is_empty() {
        return true;
    }
    match parse_chunk(data) {
        Ok(Some(fragment)) => {
            queue.push_back(Ok(fragment));
            true
        }
        Ok(None) => true,
        Err(e) => {
            queue.push_back(Err(e));
            false
        }
    }
}

#[derive(Deserialize)]
struct ChunkBody {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parse one `data:` payload. Chunks without a delta (role-only openers,
/// usage trailers, Azure's content-filter preamble) yield `None`.
fn parse_chunk(data: &str) -> Result<Option<ResponseFragment>, ApiError> {
    let body: ChunkBody =
        serde_json::from_str(data).map_err(|e| ApiError::StreamParse(format!("{e}: {data}")))?;

    if let Some(error) = body.error {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(ApiError::StreamAborted(message));
    }

    let Some(delta) = body.choices.into_iter().next().and_then(|c| c.delta) else {
        return Ok(None);
    };

    let tool_calls: Vec<ToolCallDelta> = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    let content = delta.content.filter(|c| !c.is_empty());
    if content.is_none() && tool_calls.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResponseFragment {
        content,
        tool_calls,
    }))
}
