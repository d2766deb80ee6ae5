// ABOUTME: OpenAI-compatible Chat Completions adapter implementing ModelBackend.
// ABOUTME: Also serves local Ollama endpoints, which speak the same wire format without an API key.

use async_trait::async_trait;
use serde_json::{Value, json};

use switchyard_core::{Conversation, Role, TokenUsage, ToolCallRequest, ToolSchema};

use crate::providers::{send_json, system_prompt_with_hints};
use crate::runtime::{BackendError, ExchangeRequest, ModelBackend, ModelReply, ModelTurn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "llama3.1";
const MAX_TOKENS: u32 = 4096;

/// Chat Completions backend. Maps tool definitions to function tools and
/// `tool_calls` responses back to tool-call requests.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    provider: &'static str,
}

impl OpenAiBackend {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key),
            base_url,
            model,
            provider: "openai",
        }
    }

    /// A local Ollama server; no key is sent.
    pub fn ollama(base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            base_url,
            model,
            provider: "ollama",
        }
    }

    /// Build the JSON request body for the Chat Completions API.
    pub fn build_request_body(&self, request: &ExchangeRequest<'_>) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": system_prompt_with_hints(request.system_prompt, request.hints),
        })];
        messages.extend(build_messages(request.conversation));

        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(build_tools(request.tools));
        }
        body
    }

    /// Parse a Chat Completions response into a turn.
    pub fn parse_response(response_body: &Value) -> Result<ModelTurn, BackendError> {
        let message = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| BackendError::InvalidResponse("missing choices[0].message".to_string()))?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .filter(|c| !c.is_empty())
            .map(String::from);

        let mut calls = Vec::new();
        if let Some(tool_calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for call in tool_calls {
                let function = call.get("function").ok_or_else(|| {
                    BackendError::InvalidResponse("tool call missing function".to_string())
                })?;
                let name = function.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                    BackendError::InvalidResponse("tool call missing function name".to_string())
                })?;
                let id = call.get("id").and_then(|i| i.as_str()).unwrap_or_default();
                calls.push(ToolCallRequest::new(id, name, parse_arguments(function.get("arguments"))));
            }
        }

        let usage = response_body.get("usage");
        let tokens = |field: &str| {
            usage
                .and_then(|u| u.get(field))
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
        };

        Ok(ModelTurn {
            reply: ModelReply::from_parts(text, calls),
            usage: TokenUsage::new(tokens("prompt_tokens"), tokens("completion_tokens")),
        })
    }
}

/// Function arguments arrive as a JSON-encoded string. A string that does
/// not parse is passed through as-is so dispatch reports it as malformed.
fn parse_arguments(raw: Option<&Value>) -> Value {
    match raw {
        Some(Value::String(s)) if s.trim().is_empty() => json!({}),
        Some(Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(other) => other.clone(),
        None => json!({}),
    }
}

fn build_tools(tools: &[ToolSchema]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters_json(),
                }
            })
        })
        .collect()
}

pub fn build_messages(conversation: &Conversation) -> Vec<Value> {
    let mut messages = Vec::new();
    for msg in conversation.messages() {
        match msg.role {
            Role::User => messages.push(json!({
                "role": "user",
                "content": msg.text().unwrap_or_default(),
            })),
            Role::Agent => {
                let text = msg.text().filter(|t| !t.is_empty());
                if msg.tool_calls.is_empty() {
                    if let Some(text) = text {
                        messages.push(json!({ "role": "assistant", "content": text }));
                    }
                    continue;
                }
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.call_id,
                            "type": "function",
                            "function": {
                                "name": call.tool_name,
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                messages.push(json!({
                    "role": "assistant",
                    "content": text,
                    "tool_calls": calls,
                }));
            }
            Role::ToolResult => {
                if let Some(result) = &msg.tool_result {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": result.call_id,
                        "content": result.content,
                    }));
                }
            }
        }
    }
    messages
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<ModelTurn, BackendError> {
        let body = self.build_request_body(&request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut http = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.header("Authorization", format!("Bearer {}", key));
        }
        let response_body = send_json(http, self.provider).await?;

        Self::parse_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextHints;
    use switchyard_core::{ParamSpec, ParamType, ToolCallResult, ToolStatus};

    fn backend() -> OpenAiBackend {
        OpenAiBackend::new(
            "sk-test".to_string(),
            DEFAULT_BASE_URL.to_string(),
            DEFAULT_MODEL.to_string(),
        )
    }

    #[test]
    fn maps_tool_round_to_chat_messages() {
        let mut conversation = Conversation::new();
        conversation.push_user("what's here?");
        conversation.push_tool_calls(
            None,
            vec![ToolCallRequest::new("call_1", "list_files", json!({"directory_path": "/w"}))],
        );
        conversation
            .push_tool_result(ToolCallResult {
                call_id: "call_1".to_string(),
                tool_name: "list_files".to_string(),
                content: "[F] a.txt".to_string(),
                status: ToolStatus::Success,
            })
            .unwrap();
        conversation.push_agent_text("One file.");

        let messages = build_messages(&conversation);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["role"], "assistant");
        assert!(messages[1]["content"].is_null());
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "list_files");
        let args: Value =
            serde_json::from_str(messages[1]["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["directory_path"], "/w");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        assert_eq!(messages[3]["content"], "One file.");
    }

    #[test]
    fn request_body_leads_with_system_message() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        let tools = vec![ToolSchema::new(
            "read_file",
            "Read.",
            vec![ParamSpec::required("file_path", ParamType::Path, "File.")],
        )];
        let hints = ContextHints::default();
        let request = ExchangeRequest {
            system_prompt: "You help.",
            conversation: &conversation,
            tools: &tools,
            hints: &hints,
        };

        let body = backend().build_request_body(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You help.");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["parameters"]["required"][0], "file_path");
    }

    #[test]
    fn parses_tool_calls_and_usage() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"file_path\": \"a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 40, "completion_tokens": 12}
        });
        let turn = OpenAiBackend::parse_response(&body).unwrap();
        assert_eq!(turn.usage.total(), 52);
        match turn.reply {
            ModelReply::ToolCalls { text, calls } => {
                assert!(text.is_none());
                assert_eq!(calls[0].call_id, "call_abc");
                assert_eq!(calls[0].arguments["file_path"], "a.txt");
            }
            other => panic!("expected tool calls, got {:?}", other),
        }
    }

    #[test]
    fn malformed_arguments_are_preserved() {
        assert_eq!(
            parse_arguments(Some(&json!("{not json"))),
            Value::String("{not json".to_string())
        );
        assert_eq!(parse_arguments(Some(&json!(""))), json!({}));
    }

    #[test]
    fn parses_text_reply() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "Done."}}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        });
        let turn = OpenAiBackend::parse_response(&body).unwrap();
        assert_eq!(turn.reply, ModelReply::Final("Done.".to_string()));
    }

    #[test]
    fn missing_choices_is_invalid() {
        assert!(matches!(
            OpenAiBackend::parse_response(&json!({"error": "x"})),
            Err(BackendError::InvalidResponse(_))
        ));
    }

    #[test]
    fn ollama_reports_its_provider() {
        let backend = OpenAiBackend::ollama(OLLAMA_BASE_URL.to_string(), OLLAMA_MODEL.to_string());
        assert_eq!(backend.provider_name(), "ollama");
        assert_eq!(backend.model_name(), OLLAMA_MODEL);
    }
}
