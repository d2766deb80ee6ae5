// ABOUTME: Transient bookkeeping for one tool dispatch: arguments, risk, confirmation, and outcome.
// ABOUTME: A record lives only until it is folded into the conversation as a tool-result message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::{ToolCallRequest, ToolCallResult, ToolStatus};
use crate::tool::RiskLevel;

/// Result of passing a call through the confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Approved,
    Denied,
    NotRequired,
}

impl ConfirmationOutcome {
    pub fn allows_execution(&self) -> bool {
        !matches!(self, ConfirmationOutcome::Denied)
    }
}

/// One tool call as it moves through dispatch. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub risk: RiskLevel,
    pub confirmation: ConfirmationOutcome,
    pub status: ToolStatus,
    pub output: String,
}

impl ToolCallRecord {
    pub fn from_request(request: &ToolCallRequest) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool_name: request.tool_name.clone(),
            arguments: request.arguments.clone(),
            risk: RiskLevel::Normal,
            confirmation: ConfirmationOutcome::NotRequired,
            status: ToolStatus::Failed,
            output: String::new(),
        }
    }

    pub fn succeed(mut self, output: impl Into<String>) -> Self {
        self.status = ToolStatus::Success;
        self.output = output.into();
        self
    }

    pub fn fail(mut self, output: impl Into<String>) -> Self {
        self.status = ToolStatus::Failed;
        self.output = output.into();
        self
    }

    pub fn decline(mut self, output: impl Into<String>) -> Self {
        self.confirmation = ConfirmationOutcome::Denied;
        self.status = ToolStatus::Declined;
        self.output = output.into();
        self
    }

    /// Consume the record into the result message payload.
    pub fn into_result(self) -> ToolCallResult {
        ToolCallResult {
            call_id: self.call_id,
            tool_name: self.tool_name,
            content: self.output,
            status: self.status,
        }
    }
}
