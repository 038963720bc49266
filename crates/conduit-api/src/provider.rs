//! OpenAI-compatible provider implementation.

use crate::client::{ApiClient, Endpoint};
use crate::retry::RetryConfig;
use conduit_types::provider::{FragmentStream, Provider};
use conduit_types::{ApiError, ChatCompletionRequest};
use std::future::Future;
use std::pin::Pin;

/// Streaming chat completions over an OpenAI-compatible endpoint.
///
/// Retry logic stays in `ApiClient`.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: ApiClient,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, endpoint: Endpoint) -> Result<Self, ApiError> {
        Ok(Self {
            client: ApiClient::new(api_key, endpoint)?,
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }
}

impl Provider for OpenAiProvider {
    fn stream_completion<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<FragmentStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let stream = self.client.stream_completion(request).await?;
            Ok(Box::pin(stream) as FragmentStream)
        })
    }

    fn name(&self) -> &str {
        match self.client.endpoint() {
            Endpoint::OpenAi { .. } => "openai",
            Endpoint::Azure { .. } => "azure-openai",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_follows_flavor() {
        let openai = OpenAiProvider::new(
            "k",
            Endpoint::OpenAi {
                base_url: "https://api.openai.com/v1".into(),
            },
        )
        .unwrap();
        assert_eq!(openai.name(), "openai");

        let azure = OpenAiProvider::new(
            "k",
            Endpoint::Azure {
                resource_url: "https://res.openai.azure.com".into(),
                api_version: "2024-06-01".into(),
            },
        )
        .unwrap()
        .with_retry_config(RetryConfig {
            max_retries: 5,
            ..RetryConfig::default()
        });
        assert_eq!(azure.name(), "azure-openai");
    }
}
