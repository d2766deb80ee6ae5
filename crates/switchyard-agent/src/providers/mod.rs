// ABOUTME: Provider module aggregating the HTTP-backed ModelBackend adapters.
// ABOUTME: Holds the pieces every adapter shares: prompt assembly and HTTP status classification.

pub mod anthropic;
pub mod openai;

use serde_json::Value;

use crate::context::ContextHints;
use crate::runtime::BackendError;

/// Append rendered context hints to an agent's system prompt.
pub fn system_prompt_with_hints(system_prompt: &str, hints: &ContextHints) -> String {
    match hints.render() {
        Some(block) => format!("{}\n\n[Session context]\n{}", system_prompt, block),
        None => system_prompt.to_string(),
    }
}

/// Map a non-success HTTP status to a backend error.
///
/// 429 and 5xx are transient. Other 4xx are the caller's fault, with
/// oversize prompts singled out so they are not mistaken for bad schemas.
pub fn classify_status(status: reqwest::StatusCode, body: &str, provider: &str) -> BackendError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return BackendError::RateLimited;
    }
    if status.is_server_error() {
        return BackendError::Unavailable(format!("{} server error: {}", provider, status));
    }
    if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE
        || body.contains("context_length_exceeded")
        || body.contains("prompt is too long")
    {
        return BackendError::ContextTooLarge;
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return BackendError::InvalidRequest(format!("unauthorized: check the {} API key", provider));
    }
    BackendError::InvalidRequest(format!("{} API error {}: {}", provider, status, body))
}

/// Send a prepared request and decode the JSON body.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<Value, BackendError> {
    let response = request
        .send()
        .await
        .map_err(|e| BackendError::Unavailable(format!("HTTP request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body, provider));
    }

    response
        .json()
        .await
        .map_err(|e| BackendError::InvalidResponse(format!("failed to parse JSON: {}", e)))
}
