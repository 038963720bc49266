//! Chat-completions HTTP client (OpenAI and Azure OpenAI flavors).

use conduit_types::{ApiError, ChatCompletionRequest};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::retry::{self, RetryConfig, is_retryable};
use crate::stream::CompletionStream;

/// Where completion requests go and how they authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST {base_url}/chat/completions` with a bearer token.
    OpenAi { base_url: String },
    /// `POST {resource}/openai/deployments/{model}/chat/completions?api-version=…`
    /// with an `api-key` header. The request's model names the deployment.
    Azure {
        resource_url: String,
        api_version: String,
    },
}

impl Endpoint {
    pub fn url(&self, model: &str) -> String {
        match self {
            Endpoint::OpenAi { base_url } => {
                format!("{}/chat/completions", base_url.trim_end_matches('/'))
            }
            Endpoint::Azure {
                resource_url,
                api_version,
            } => format!(
                "{}/openai/deployments/{model}/chat/completions?api-version={api_version}",
                resource_url.trim_end_matches('/')
            ),
        }
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: Endpoint,
    retry_config: RetryConfig,
}

impl ApiClient {
    pub fn new(api_key: impl Into<String>, endpoint: Endpoint) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint,
            retry_config: RetryConfig::default(),
        })
    }

    /// Set the retry configuration for transient errors (429, 5xx, network).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let invalid_key = |_| ApiError::Auth {
            message: "Invalid API key format".into(),
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        match self.endpoint {
            Endpoint::OpenAi { .. } => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                        .map_err(invalid_key)?,
                );
            }
            Endpoint::Azure { .. } => {
                headers.insert(
                    "api-key",
                    HeaderValue::from_str(&self.api_key).map_err(invalid_key)?,
                );
            }
        }
        Ok(headers)
    }

    /// Send a streaming chat-completions request and return a stream of
    /// fragments.
    ///
    /// Only establishing the stream is retried; once the body is flowing,
    /// failures surface through the stream.
    pub async fn stream_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<CompletionStream, ApiError> {
        let url = self.endpoint.url(&request.model);
        let headers = self.headers()?;
        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let mut attempt = 0;
        loop {
            tracing::debug!(
                "POST {url} (attempt {}/{})",
                attempt + 1,
                self.retry_config.max_retries + 1
            );

            let (err, hint) = match self
                .http
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return Ok(CompletionStream::new(response.bytes_stream()));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let hint = retry::retry_hint(response.headers());
                    let body_text = response.text().await.unwrap_or_default();
                    (retry::classify(&self.endpoint, status, &body_text, hint), hint)
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            if !is_retryable(&err) || attempt >= self.retry_config.max_retries {
                return Err(err);
            }

            let delay = self.retry_config.delay(attempt, hint);
            tracing::warn!(
                "Retryable API error (attempt {}/{}): {err}. Retrying in {}ms...",
                attempt + 1,
                self.retry_config.max_retries + 1,
                delay.as_millis(),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
