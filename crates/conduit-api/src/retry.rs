//! When, and how long to wait before, a completion request is sent again.
//!
//! OpenAI and Azure OpenAI both publish server-side wait hints and an error
//! body with a machine-readable `code`. Both feed the decision here: the
//! hint overrides local backoff, the code can turn an otherwise retryable
//! status into a permanent failure (quota exhausted) or the reverse.

use std::time::Duration;

use conduit_types::ApiError;
use rand::Rng;
use reqwest::header::HeaderMap;

use crate::client::Endpoint;

/// Retry budget for opening a completion stream.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one (0 disables retrying).
    pub max_retries: u32,
    /// Backoff ceiling for the first retry. Doubles every attempt.
    pub base_delay: Duration,
    /// No wait, hinted or computed, exceeds this.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Wait before retry number `attempt + 1`.
    ///
    /// A server hint wins when present. Otherwise the ceiling is
    /// `base_delay * 2^attempt` and the wait is drawn from its upper half.
    pub fn delay(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_delay);
        }
        let ceiling = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        Duration::from_millis(rand::rng().random_range(ceiling_ms / 2..=ceiling_ms))
    }
}

/// Errors worth sending the same request again for. Nothing is retried once
/// fragments have been yielded.
pub fn is_retryable(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::RateLimited { .. }
            | ApiError::Server { .. }
            | ApiError::Network(_)
            | ApiError::Timeout
    )
}

/// Server-requested wait, most precise header first.
///
/// `retry-after-ms` (milliseconds) is what Azure OpenAI and the OpenAI API
/// send alongside 429 and 503. `retry-after` carries seconds. As a last
/// resort the later of OpenAI's `x-ratelimit-reset-requests` and
/// `x-ratelimit-reset-tokens` is used (Go-style durations such as `6m0s`).
pub fn retry_hint(headers: &HeaderMap) -> Option<Duration> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    if let Some(ms) = header("retry-after-ms").and_then(|s| s.trim().parse::<f64>().ok()) {
        return finite_duration(ms / 1000.0);
    }
    if let Some(secs) = header("retry-after").and_then(|s| s.trim().parse::<f64>().ok()) {
        return finite_duration(secs);
    }
    ["x-ratelimit-reset-requests", "x-ratelimit-reset-tokens"]
        .into_iter()
        .filter_map(|name| header(name).and_then(parse_reset))
        .max()
}

fn finite_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Parse `1s`, `250ms`, `6m0s`, `1h2m3.5s`.
fn parse_reset(value: &str) -> Option<Duration> {
    let mut total = 0.0;
    let mut rest = value.trim();
    if rest.is_empty() {
        return None;
    }
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number: f64 = rest[..split].parse().ok()?;
        rest = &rest[split..];
        let (scale, unit_len) = if rest.starts_with("ms") {
            (0.001, 2)
        } else if rest.starts_with('h') {
            (3600.0, 1)
        } else if rest.starts_with('m') {
            (60.0, 1)
        } else if rest.starts_with('s') {
            (1.0, 1)
        } else {
            return None;
        };
        total += number * scale;
        rest = &rest[unit_len..];
    }
    finite_duration(total)
}

/// Turn a non-2xx completion response into a typed error.
pub fn classify(endpoint: &Endpoint, status: u16, body: &str, hint: Option<Duration>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
        code: Option<serde_json::Value>,
    }

    let detail = serde_json::from_str::<ErrorBody>(body).ok().and_then(|b| b.error);
    let code = detail
        .as_ref()
        .and_then(|d| d.code.as_ref())
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let message = detail
        .and_then(|d| d.message)
        .unwrap_or_else(|| body.to_string());
    let azure = matches!(endpoint, Endpoint::Azure { .. });

    match status {
        401 | 403 => ApiError::Auth { message },
        408 => ApiError::Timeout,
        // OpenAI answers 409 when a concurrent request holds the resource;
        // Azure uses it for a deployment in a conflicting state.
        409 if azure => ApiError::BadRequest { message },
        409 => ApiError::Server { status, message },
        429 if code == "insufficient_quota" => ApiError::BadRequest {
            message: format!("quota exhausted: {message}"),
        },
        429 => ApiError::RateLimited {
            retry_after_ms: hint.map(|d| d.as_millis() as u64),
        },
        400 if code == "content_filter" => ApiError::BadRequest {
            message: format!("prompt rejected by content filter: {message}"),
        },
        400..=499 => ApiError::BadRequest { message },
        _ => ApiError::Server { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn openai() -> Endpoint {
        Endpoint::OpenAi {
            base_url: "https://api.openai.com/v1".into(),
        }
    }

    fn azure() -> Endpoint {
        Endpoint::Azure {
            resource_url: "https://res.openai.azure.com".into(),
            api_version: "2024-05-01-preview".into(),
        }
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn retry_after_ms_wins_over_seconds() {
        let h = headers(&[("retry-after-ms", "250"), ("retry-after", "7")]);
        assert_eq!(retry_hint(&h), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_seconds() {
        let h = headers(&[("retry-after", "1.5")]);
        assert_eq!(retry_hint(&h), Some(Duration::from_millis(1500)));
        assert_eq!(retry_hint(&headers(&[("retry-after", "soon")])), None);
        assert_eq!(retry_hint(&HeaderMap::new()), None);
    }

    #[test]
    fn negative_hint_is_ignored() {
        assert_eq!(retry_hint(&headers(&[("retry-after-ms", "-5")])), None);
    }

    #[test]
    fn ratelimit_reset_takes_the_later_window() {
        let h = headers(&[
            ("x-ratelimit-reset-requests", "120ms"),
            ("x-ratelimit-reset-tokens", "1m2.5s"),
        ]);
        assert_eq!(retry_hint(&h), Some(Duration::from_millis(62_500)));
    }

    #[test]
    fn reset_durations() {
        assert_eq!(parse_reset("6m0s"), Some(Duration::from_secs(360)));
        assert_eq!(parse_reset("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_reset("20ms"), Some(Duration::from_millis(20)));
        assert_eq!(parse_reset("3x"), None);
        assert_eq!(parse_reset(""), None);
    }

    #[test]
    fn hint_is_capped() {
        let config = RetryConfig {
            max_delay: Duration::from_secs(10),
            ..RetryConfig::default()
        };
        assert_eq!(
            config.delay(0, Some(Duration::from_secs(30))),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.delay(0, Some(Duration::from_millis(5))),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn backoff_doubles_within_upper_half() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };
        for (attempt, ceiling) in [(0u32, 100u64), (1, 200), (3, 800)] {
            let delay = config.delay(attempt, None).as_millis() as u64;
            assert!(
                (ceiling / 2..=ceiling).contains(&delay),
                "attempt {attempt}: delay={delay}"
            );
        }
        assert!(config.delay(40, None) <= config.max_delay);
    }

    #[test]
    fn timeouts_and_throttling_are_retryable() {
        assert!(is_retryable(&classify(&openai(), 408, "", None)));
        assert!(is_retryable(&classify(&azure(), 503, "busy", None)));
        let throttled = classify(&azure(), 429, "{}", Some(Duration::from_millis(1200)));
        assert!(matches!(
            throttled,
            ApiError::RateLimited {
                retry_after_ms: Some(1200)
            }
        ));
    }

    #[test]
    fn conflict_depends_on_endpoint() {
        let body = r#"{"error":{"message":"conflict"}}"#;
        assert!(is_retryable(&classify(&openai(), 409, body, None)));
        let err = classify(&azure(), 409, body, None);
        assert!(!is_retryable(&err));
        assert!(matches!(err, ApiError::BadRequest { message } if message == "conflict"));
    }

    #[test]
    fn exhausted_quota_is_permanent() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        let err = classify(&openai(), 429, body, None);
        assert!(!is_retryable(&err));
        assert!(err.to_string().contains("quota exhausted"));
    }

    #[test]
    fn azure_content_filter_is_named() {
        let body = r#"{"error":{"message":"The response was filtered","code":"content_filter","status":400}}"#;
        match classify(&azure(), 400, body, None) {
            ApiError::BadRequest { message } => {
                assert!(message.starts_with("prompt rejected by content filter"));
            }
            other => panic!("Expected BadRequest, got {other:?}"),
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert!(matches!(classify(&openai(), 401, "nope", None), ApiError::Auth { .. }));
        let err = classify(
            &azure(),
            404,
            r#"{"error":{"code":"DeploymentNotFound","message":"deployment missing"}}"#,
            None,
        );
        assert!(matches!(&err, ApiError::BadRequest { message } if message == "deployment missing"));
        assert!(!is_retryable(&err));
        assert!(!is_retryable(&ApiError::StreamParse("bad json".into())));
    }

    #[test]
    fn server_message_comes_from_error_body() {
        match classify(&openai(), 500, r#"{"error":{"message":"boom"}}"#, None) {
            ApiError::Server { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("Expected Server, got {other:?}"),
        }
    }
}
