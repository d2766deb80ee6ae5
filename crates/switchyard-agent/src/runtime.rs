// ABOUTME: Defines the ModelBackend trait that all LLM provider adapters must implement.
// ABOUTME: Also defines ModelTurn/ModelReply (what a backend returns) and BackendError (what can go wrong).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use switchyard_core::{Conversation, TokenUsage, ToolCallRequest, ToolSchema};

use crate::context::ContextHints;

/// Everything a backend needs for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeRequest<'a> {
    pub system_prompt: &'a str,
    pub conversation: &'a Conversation,
    pub tools: &'a [ToolSchema],
    pub hints: &'a ContextHints,
}

/// What the model wants to do next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ModelReply {
    /// A final answer; the run terminates with this text.
    Final(String),

    /// One or more tool invocations, optionally with interleaved text.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
}

impl ModelReply {
    /// Build a reply from parsed response parts. A response without tool
    /// calls is final, even if its text is empty.
    pub fn from_parts(text: Option<String>, calls: Vec<ToolCallRequest>) -> Self {
        if calls.is_empty() {
            ModelReply::Final(text.unwrap_or_default())
        } else {
            ModelReply::ToolCalls { text, calls }
        }
    }
}

/// One backend response plus the tokens it cost.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTurn {
    pub reply: ModelReply,
    pub usage: TokenUsage,
}

impl ModelTurn {
    pub fn final_text(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            reply: ModelReply::Final(text.into()),
            usage,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>, usage: TokenUsage) -> Self {
        Self {
            reply: ModelReply::ToolCalls { text: None, calls },
            usage,
        }
    }
}

/// Errors that can occur while talking to a language-model backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited")]
    RateLimited,

    #[error("request rejected: {0}")]
    InvalidRequest(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("context too large")]
    ContextTooLarge,
}

impl BackendError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::RateLimited)
    }
}

/// Trait that all LLM provider adapters must implement. Each provider
/// translates the conversation and tool schemas into its API and parses
/// the response into a ModelTurn.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send the conversation and available tools; return a final answer or
    /// tool-call requests.
    async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<ModelTurn, BackendError>;

    /// Provider name for logging and display (e.g. "anthropic", "openai").
    fn provider_name(&self) -> &str;

    /// Model identifier being used.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_without_calls_is_final() {
        assert_eq!(
            ModelReply::from_parts(Some("done".to_string()), Vec::new()),
            ModelReply::Final("done".to_string())
        );
        assert_eq!(
            ModelReply::from_parts(None, Vec::new()),
            ModelReply::Final(String::new())
        );
    }

    #[test]
    fn reply_with_calls_keeps_text() {
        let call = ToolCallRequest::new("c1", "list_files", json!({}));
        let reply = ModelReply::from_parts(Some("checking".to_string()), vec![call.clone()]);
        assert_eq!(
            reply,
            ModelReply::ToolCalls {
                text: Some("checking".to_string()),
                calls: vec![call],
            }
        );
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(BackendError::Unavailable("timeout".to_string()).is_retryable());
        assert!(BackendError::RateLimited.is_retryable());
        assert!(!BackendError::InvalidRequest("bad".to_string()).is_retryable());
        assert!(!BackendError::InvalidResponse("bad".to_string()).is_retryable());
        assert!(!BackendError::ContextTooLarge.is_retryable());
    }

    #[test]
    fn backend_error_display() {
        assert!(
            BackendError::Unavailable("connection refused".to_string())
                .to_string()
                .contains("connection refused")
        );
    }
}
