//! Provider trait for streaming chat-completion endpoints.

use crate::{ApiError, ChatCompletionRequest, ResponseFragment};
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;

/// A boxed async stream of response fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<ResponseFragment, ApiError>> + Send>>;

/// A chat-completion backend that streams its answer.
///
/// The returned stream is finite and not restartable. It yields every decoded
/// fragment as soon as it arrives and ends when the endpoint signals
/// completion; no end marker is synthesized.
pub trait Provider: Send + Sync {
    fn stream_completion<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FragmentStream, ApiError>> + Send + 'a>>;

    /// Provider name for logging/display (e.g., "openai").
    fn name(&self) -> &str;
}
