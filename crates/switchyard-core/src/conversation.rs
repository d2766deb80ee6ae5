// ABOUTME: Ordered conversation history owned by one (session, agent) pair.
// ABOUTME: Enforces that every tool result answers an earlier, still-outstanding tool-call request.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{ConversationMessage, Role, ToolCallRequest, ToolCallResult};

/// Errors raised when a conversation would violate its ordering invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("tool result for call '{call_id}' has no outstanding tool-call request")]
    OrphanResult { call_id: String },

    #[error("message {index} has role {role} but carries no payload")]
    EmptyMessage { index: usize, role: Role },
}

/// An ordered sequence of messages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a conversation from raw messages, checking the invariants.
    pub fn from_messages(messages: Vec<ConversationMessage>) -> Result<Self, ConversationError> {
        let conversation = Self { messages };
        conversation.validate()?;
        Ok(conversation)
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(ConversationMessage::user(text));
    }

    pub fn push_agent_text(&mut self, text: impl Into<String>) {
        self.messages.push(ConversationMessage::agent_text(text));
    }

    pub fn push_tool_calls(&mut self, text: Option<String>, calls: Vec<ToolCallRequest>) {
        self.messages
            .push(ConversationMessage::agent_tool_calls(text, calls));
    }

    /// Append a tool result. Fails if no earlier request with the same call
    /// identifier is still waiting for an answer.
    pub fn push_tool_result(&mut self, result: ToolCallResult) -> Result<(), ConversationError> {
        let outstanding = self.outstanding();
        if outstanding.get(result.call_id.as_str()).copied().unwrap_or(0) == 0 {
            return Err(ConversationError::OrphanResult {
                call_id: result.call_id,
            });
        }
        self.messages.push(ConversationMessage::tool_result(result));
        Ok(())
    }

    /// Check the whole sequence: no orphan results, no payload-less messages.
    pub fn validate(&self) -> Result<(), ConversationError> {
        let mut outstanding: HashMap<&str, usize> = HashMap::new();
        for (index, msg) in self.messages.iter().enumerate() {
            match msg.role {
                Role::User => {
                    if msg.content.is_none() {
                        return Err(ConversationError::EmptyMessage {
                            index,
                            role: msg.role,
                        });
                    }
                }
                Role::Agent => {
                    if msg.content.is_none() && msg.tool_calls.is_empty() {
                        return Err(ConversationError::EmptyMessage {
                            index,
                            role: msg.role,
                        });
                    }
                    for call in &msg.tool_calls {
                        *outstanding.entry(call.call_id.as_str()).or_insert(0) += 1;
                    }
                }
                Role::ToolResult => {
                    let Some(result) = &msg.tool_result else {
                        return Err(ConversationError::EmptyMessage {
                            index,
                            role: msg.role,
                        });
                    };
                    match outstanding.get_mut(result.call_id.as_str()) {
                        Some(count) if *count > 0 => *count -= 1,
                        _ => {
                            return Err(ConversationError::OrphanResult {
                                call_id: result.call_id.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Text of the most recent agent message that had any.
    pub fn last_agent_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Agent)
            .find_map(|m| m.text())
    }

    /// Names of the most recently requested tools, newest last.
    pub fn recent_tool_names(&self, limit: usize) -> Vec<String> {
        let mut names: Vec<String> = self
            .messages
            .iter()
            .rev()
            .flat_map(|m| m.tool_calls.iter().rev())
            .take(limit)
            .map(|c| c.tool_name.clone())
            .collect();
        names.reverse();
        names
    }

    fn outstanding(&self) -> HashMap<&str, usize> {
        let mut outstanding: HashMap<&str, usize> = HashMap::new();
        for msg in &self.messages {
            for call in &msg.tool_calls {
                *outstanding.entry(call.call_id.as_str()).or_insert(0) += 1;
            }
            if let Some(result) = &msg.tool_result
                && let Some(count) = outstanding.get_mut(result.call_id.as_str())
            {
                *count = count.saturating_sub(1);
            }
        }
        outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolStatus;
    use serde_json::json;

    fn result(call_id: &str) -> ToolCallResult {
        ToolCallResult {
            call_id: call_id.to_string(),
            tool_name: "list_files".to_string(),
            content: "ok".to_string(),
            status: ToolStatus::Success,
        }
    }

    fn call(call_id: &str) -> ToolCallRequest {
        ToolCallRequest::new(call_id, "list_files", json!({}))
    }

    #[test]
    fn orphan_result_is_rejected() {
        let mut conv = Conversation::new();
        conv.push_user("hello");
        let err = conv.push_tool_result(result("missing")).unwrap_err();
        assert_eq!(
            err,
            ConversationError::OrphanResult {
                call_id: "missing".to_string()
            }
        );
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn a_call_can_only_be_answered_once() {
        let mut conv = Conversation::new();
        conv.push_user("go");
        conv.push_tool_calls(None, vec![call("c1")]);
        conv.push_tool_result(result("c1")).unwrap();
        assert!(conv.push_tool_result(result("c1")).is_err());
    }

    #[test]
    fn reused_call_id_in_a_later_turn_is_answerable() {
        let mut conv = Conversation::new();
        conv.push_user("go");
        conv.push_tool_calls(None, vec![call("c1")]);
        conv.push_tool_result(result("c1")).unwrap();
        conv.push_tool_calls(None, vec![call("c1")]);
        conv.push_tool_result(result("c1")).unwrap();
        assert!(conv.validate().is_ok());
    }

    #[test]
    fn validate_rejects_result_before_request() {
        let messages = vec![
            ConversationMessage::user("go"),
            ConversationMessage::tool_result(result("c1")),
            ConversationMessage::agent_tool_calls(None, vec![call("c1")]),
        ];
        assert!(Conversation::from_messages(messages).is_err());
    }

    #[test]
    fn validate_rejects_payloadless_agent_message() {
        let mut msg = ConversationMessage::agent_text("x");
        msg.content = None;
        let err = Conversation::from_messages(vec![msg]).unwrap_err();
        assert!(matches!(err, ConversationError::EmptyMessage { index: 0, .. }));
    }

    #[test]
    fn last_agent_text_skips_tool_only_turns() {
        let mut conv = Conversation::new();
        conv.push_user("go");
        conv.push_agent_text("first answer");
        conv.push_tool_calls(None, vec![call("c1")]);
        assert_eq!(conv.last_agent_text(), Some("first answer"));
    }

    #[test]
    fn recent_tool_names_are_bounded_and_ordered() {
        let mut conv = Conversation::new();
        conv.push_user("go");
        conv.push_tool_calls(
            None,
            vec![
                ToolCallRequest::new("1", "read_file", json!({})),
                ToolCallRequest::new("2", "list_files", json!({})),
            ],
        );
        conv.push_tool_calls(
            None,
            vec![ToolCallRequest::new("3", "write_file", json!({}))],
        );
        assert_eq!(conv.recent_tool_names(2), vec!["list_files", "write_file"]);
    }

    #[test]
    fn serializes_as_a_plain_array() {
        let mut conv = Conversation::new();
        conv.push_user("hi");
        let value = serde_json::to_value(&conv).unwrap();
        assert!(value.is_array());
        let back: Conversation = serde_json::from_value(value).unwrap();
        assert_eq!(back, conv);
    }
}
