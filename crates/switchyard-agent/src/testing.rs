// ABOUTME: Test doubles for switchyard-agent: a scripted backend, a fixed-output tool, a recording channel.
// ABOUTME: Used by unit and scenario tests to drive agents without real API calls or operators.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::{
    Conversation, ParamSpec, ParamType, RiskLevel, TokenUsage, ToolCallRequest, ToolSchema,
};

use crate::confirm::{ConfirmationChannel, ConfirmationDecision, ConfirmationRequest};
use crate::context::ContextHints;
use crate::runtime::{BackendError, ExchangeRequest, ModelBackend, ModelTurn};
use crate::tools::{Tool, ToolContext};

/// What a ScriptedBackend saw on one exchange.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub system_prompt: String,
    pub conversation: Conversation,
    pub tool_names: Vec<String>,
    pub hints: ContextHints,
}

/// A backend that replays a queue of turns and errors.
///
/// Once the script runs out, every exchange fails with an invalid-response
/// error, so a test that over-runs its script fails loudly.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<ModelTurn, BackendError>>>,
    requests: Mutex<Vec<CapturedRequest>>,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_turn(self, turn: ModelTurn) -> Self {
        self.push(Ok(turn));
        self
    }

    /// Queue a final answer with zero token usage.
    pub fn then_final(self, text: &str) -> Self {
        self.then_turn(ModelTurn::final_text(text, TokenUsage::default()))
    }

    pub fn then_tool_calls(self, calls: Vec<ToolCallRequest>) -> Self {
        self.then_turn(ModelTurn::tool_calls(calls, TokenUsage::default()))
    }

    pub fn then_error(self, error: BackendError) -> Self {
        self.push(Err(error));
        self
    }

    /// Sleep before answering each exchange.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, entry: Result<ModelTurn, BackendError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(entry);
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn exchange_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn exchange(&self, request: ExchangeRequest<'_>) -> Result<ModelTurn, BackendError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CapturedRequest {
                system_prompt: request.system_prompt.to_string(),
                conversation: request.conversation.clone(),
                tool_names: request.tools.iter().map(|t| t.name.clone()).collect(),
                hints: request.hints.clone(),
            });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Err(BackendError::InvalidResponse("script exhausted".to_string())))
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

/// A tool that returns a fixed output (or error) and records its calls.
pub struct FixedTool {
    name: String,
    output: Result<String, String>,
    risk: RiskLevel,
    params: Vec<ParamSpec>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Map<String, Value>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FixedTool {
    pub fn new(name: &str, output: &str) -> Self {
        Self::with_output(name, Ok(output.to_string()))
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self::with_output(name, Err(error.to_string()))
    }

    fn with_output(name: &str, output: Result<String, String>) -> Self {
        Self {
            name: name.to_string(),
            output,
            risk: RiskLevel::Normal,
            params: Vec::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_required_param(mut self, name: &str) -> Self {
        self.params.push(ParamSpec::required(name, ParamType::String, name));
        self
    }

    /// Declare an optional path parameter, which the run loop may default
    /// to the session working directory.
    pub fn with_path_param(mut self, name: &str) -> Self {
        self.params.push(ParamSpec::optional(name, ParamType::Path, name));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Arguments of every invocation, in start order.
    pub fn calls(&self) -> Vec<Map<String, Value>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Highest number of overlapping executions observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FixedTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(&self.name, "Fixed-output test tool.", self.params.clone())
    }

    fn risk(&self) -> RiskLevel {
        self.risk
    }

    async fn execute(&self, args: Map<String, Value>, _ctx: &ToolContext) -> anyhow::Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(args.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = args
            .get("delay_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        match &self.output {
            Ok(text) => Ok(text.clone()),
            Err(message) => Err(anyhow::anyhow!(message.clone())),
        }
    }
}

/// A confirmation channel that answers from a script and records requests.
/// When the script is empty it falls back to its default decision.
pub struct RecordingChannel {
    answers: Mutex<VecDeque<ConfirmationDecision>>,
    fallback: ConfirmationDecision,
    requests: Mutex<Vec<ConfirmationRequest>>,
}

impl RecordingChannel {
    pub fn always(decision: ConfirmationDecision) -> Self {
        Self::scripted(Vec::new(), decision)
    }

    pub fn scripted(answers: Vec<ConfirmationDecision>, fallback: ConfirmationDecision) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ConfirmationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ConfirmationChannel for RecordingChannel {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> ConfirmationDecision {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }
}
