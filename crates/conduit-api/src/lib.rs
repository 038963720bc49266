//! OpenAI-compatible chat-completions client with SSE streaming for Conduit.

mod client;
mod provider;
mod retry;
mod stream;

pub use client::{ApiClient, Endpoint};
pub use provider::OpenAiProvider;
pub use retry::RetryConfig;
pub use stream::CompletionStream;
