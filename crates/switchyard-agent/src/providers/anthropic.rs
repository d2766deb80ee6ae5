// ABOUTME: Anthropic Messages API adapter implementing ModelBackend.
// ABOUTME: Maps conversations to tool_use/tool_result content blocks and parses usage and tool calls back.

use async_trait::async_trait;
use serde_json::{Value, json};

use switchyard_core::{Conversation, Role, TokenUsage, ToolCallRequest, ToolSchema, ToolStatus};

use crate::providers::{send_json, system_prompt_with_hints};
use crate::runtime::{BackendError, ExchangeRequest, ModelBackend, ModelReply, ModelTurn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic backend. Calls the Messages API with tool definitions and maps
/// tool_use blocks back to tool-call requests.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    /// Build the JSON request body for the Messages API.
    pub fn build_request_body(&self, request: &ExchangeRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system_prompt_with_hints(request.system_prompt, request.hints),
            "messages": build_messages(request.conversation),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(build_tools(request.tools));
        }
        body
    }

    /// Parse a Messages API response into a turn.
    pub fn parse_response(response_body: &Value) -> Result<ModelTurn, BackendError> {
        let content = response_body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                BackendError::InvalidResponse("missing content array in response".to_string())
            })?;

        let mut texts = Vec::new();
        let mut calls = Vec::new();
        for block in content {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str())
                        && !text.is_empty()
                    {
                        texts.push(text.to_string());
                    }
                }
                Some("tool_use") => {
                    let name = block.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                        BackendError::InvalidResponse("tool_use block missing name".to_string())
                    })?;
                    let id = block.get("id").and_then(|i| i.as_str()).unwrap_or_default();
                    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    calls.push(ToolCallRequest::new(id, name, input));
                }
                _ => {}
            }
        }

        let usage = response_body.get("usage");
        let tokens = |field: &str| {
            usage
                .and_then(|u| u.get(field))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };
        let text = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };

        Ok(ModelTurn {
            reply: ModelReply::from_parts(text, calls),
            usage: TokenUsage::new(tokens("input_tokens"), tokens("output_tokens")),
        })
    }
}

fn build_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.parameters_json(),
            })
        })
        .collect()
}

/// Translate the conversation into Messages API turns. Tool results are
/// user-role blocks; consecutive same-role turns are merged.
pub fn build_messages(conversation: &Conversation) -> Vec<Value> {
    let mut messages = Vec::new();
    for msg in conversation.messages() {
        let (role, blocks) = match msg.role {
            Role::User => (
                "user",
                text_block(msg.text()).into_iter().collect::<Vec<_>>(),
            ),
            Role::Agent => {
                let mut blocks: Vec<Value> = text_block(msg.text()).into_iter().collect();
                for call in &msg.tool_calls {
                    let input = if call.arguments.is_object() {
                        call.arguments.clone()
                    } else {
                        json!({})
                    };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.call_id,
                        "name": call.tool_name,
                        "input": input,
                    }));
                }
                ("assistant", blocks)
            }
            Role::ToolResult => {
                let Some(result) = &msg.tool_result else {
                    continue;
                };
                (
                    "user",
                    vec![json!({
                        "type": "tool_result",
                        "tool_use_id": result.call_id,
                        "content": result.content,
                        "is_error": result.status != ToolStatus::Success,
                    })],
                )
            }
        };
        if !blocks.is_empty() {
            messages.push(json!({ "role": role, "content": blocks }));
        }
    }
    coalesce_messages(messages)
}

fn text_block(text: Option<&str>) -> Option<Value> {
    text.filter(|t| !t.is_empty())
        .map(|t| json!({ "type": "text", "text": t }))
}

/// Merge consecutive messages with the same role by concatenating their
/// content blocks. The Messages API requires alternating roles.
pub fn coalesce_messages(messages: Vec<Value>) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in messages {
        let role = msg.get("role").and_then(|r| r.as_str()).unwrap_or("user");
        let blocks = msg
            .get("content")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default();

        if let Some(last) = result.last_mut()
            && last.get("role").and_then(|r| r.as_str()) == Some(role)
            && let Some(existing) = last.get_mut("content").and_then(|c| c.as_array_mut())
        {
            existing.extend(blocks);
            continue;
        }

        result.push(json!({ "role": role, "content": blocks }));
    }

    result
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<ModelTurn, BackendError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/messages", self.base_url);

        let http = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        let response_body = send_json(http, "anthropic").await?;

        Self::parse_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
