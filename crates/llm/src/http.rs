//! Transport shared by every provider: one POST, status classification,
//! and error-body sanitising.

use std::time::Duration;

use pipeline::ports::LlmError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use tracing::debug;

const MAX_ERROR_BODY_LEN: usize = 200;

const SECRET_PATTERNS: &[&str] = &["api_key", "apikey", "secret", "bearer", "credential", "sk-", "x-goog-api-key"];

pub(crate) fn client(deadline: Duration) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(deadline)
        .user_agent(concat!("taskwright/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LlmError::Api {
            provider: "http".into(),
            status: 0,
            message: format!("could not build HTTP client: {e}"),
        })
}

/// Sends `body` and returns the raw response text of a 2xx answer.
pub(crate) async fn post_json<T: Serialize + ?Sized>(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &T,
) -> Result<String, LlmError> {
    let response = request.json(body).send().await.map_err(|e| transport_error(provider, &e))?;
    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await.map_err(|e| transport_error(provider, &e))?;
    debug!(provider, status = status.as_u16(), bytes = text.len(), "LLM response received");

    if status.is_success() {
        Ok(text)
    } else {
        Err(classify(provider, status, &headers, &text))
    }
}

pub(crate) fn classify(provider: &str, status: StatusCode, headers: &HeaderMap, body: &str) -> LlmError {
    let provider = provider.to_string();
    let message = sanitize(body);
    match status.as_u16() {
        429 => LlmError::RateLimited {
            provider,
            retry_after: retry_after(headers),
        },
        401 | 403 => LlmError::Authentication { provider, message },
        408 => LlmError::Transient {
            provider,
            status: 408,
            message,
        },
        code if status.is_server_error() => LlmError::Transient {
            provider,
            status: code,
            message,
        },
        code => LlmError::Api {
            provider,
            status: code,
            message,
        },
    }
}

/// Connection failures and transport deadlines carry no HTTP status.
fn transport_error(provider: &str, err: &reqwest::Error) -> LlmError {
    let message = if err.is_timeout() {
        "request deadline exceeded".to_string()
    } else {
        err.to_string()
    };
    LlmError::Transient {
        provider: provider.to_string(),
        status: 0,
        message,
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Truncates provider error bodies and drops any that may echo a credential.
pub(crate) fn sanitize(body: &str) -> String {
    let mut end = body.len().min(MAX_ERROR_BODY_LEN);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let truncated = body[..end].trim();
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted)".to_string();
    }
    truncated.to_string()
}

pub(crate) fn invalid(provider: &str, reason: impl Into<String>) -> LlmError {
    LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
