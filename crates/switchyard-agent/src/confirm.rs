// ABOUTME: Confirmation gate for high-risk tools and the channels that answer its questions.
// ABOUTME: Low-risk calls pass without suspending; high-risk calls wait for an approve/deny decision.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_core::{ConfirmationOutcome, RiskLevel, ToolCallRecord};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;

/// Everything shown to an operator when asking for approval.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationRequest {
    pub agent_name: String,
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub risk_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationDecision {
    Approved,
    Denied,
}

/// Source of operator decisions: a terminal prompt, a UI callback, or a
/// fixed policy for non-interactive runs.
#[async_trait]
pub trait ConfirmationChannel: Send + Sync {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> ConfirmationDecision;
}

/// Approves everything. For trusted automation only.
pub struct AutoApprove;

#[async_trait]
impl ConfirmationChannel for AutoApprove {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> ConfirmationDecision {
        tracing::info!(tool = %request.tool_name, call_id = %request.call_id, "auto-approved high-risk tool");
        ConfirmationDecision::Approved
    }
}

/// Denies everything. The safe default when nobody is watching.
pub struct AutoDeny;

#[async_trait]
impl ConfirmationChannel for AutoDeny {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> ConfirmationDecision {
        tracing::info!(tool = %request.tool_name, call_id = %request.call_id, "auto-denied high-risk tool");
        ConfirmationDecision::Denied
    }
}

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// One line reader over operator input, shared by everything that reads it.
///
/// The interactive task loop and [`TerminalPrompt`] must read through the
/// same buffer, or one of them swallows lines meant for the other when
/// input is piped.
#[derive(Clone)]
pub struct SharedInput {
    lines: Arc<Mutex<Lines<LineSource>>>,
}

impl SharedInput {
    pub fn new(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        let source: LineSource = Box::new(reader);
        Self {
            lines: Arc::new(Mutex::new(source.lines())),
        }
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    /// Next line without its terminator, or `None` at end of input.
    pub async fn next_line(&self) -> std::io::Result<Option<String>> {
        self.lines.lock().await.next_line().await
    }
}

/// Asks on stderr and reads the answer from the shared operator input.
///
/// Prompts are serialized so concurrent dispatches never interleave their
/// questions. End of input counts as a denial.
pub struct TerminalPrompt {
    input: SharedInput,
    lock: Mutex<()>,
}

impl TerminalPrompt {
    pub fn new(input: SharedInput) -> Self {
        Self {
            input,
            lock: Mutex::new(()),
        }
    }
}

fn render_prompt(request: &ConfirmationRequest) -> String {
    let mut args = String::new();
    if let Some(map) = request.arguments.as_object() {
        for (key, value) in map {
            args.push_str(&format!("  {}: {}\n", key, value));
        }
    } else {
        args.push_str(&format!("  {}\n", request.arguments));
    }
    format!(
        "\n*** CONFIRMATION REQUIRED ***\nAgent: {}\nTool: {}\nArguments:\n{}Reason: {}\nProceed? (yes/no): ",
        request.agent_name, request.tool_name, args, request.risk_reason
    )
}

/// Interpret one line of operator input. `None` means ask again.
fn parse_answer(line: &str) -> Option<ConfirmationDecision> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(ConfirmationDecision::Approved),
        "n" | "no" => Some(ConfirmationDecision::Denied),
        _ => None,
    }
}

#[async_trait]
impl ConfirmationChannel for TerminalPrompt {
    async fn request_confirmation(&self, request: &ConfirmationRequest) -> ConfirmationDecision {
        let _guard = self.lock.lock().await;
        let mut text = render_prompt(request);

        loop {
            eprint!("{}", text);
            match self.input.next_line().await {
                Ok(Some(line)) => {
                    if let Some(decision) = parse_answer(&line) {
                        return decision;
                    }
                    text = "Please answer 'yes' or 'no': ".to_string();
                }
                Ok(None) => {
                    tracing::warn!(tool = %request.tool_name, "input closed during confirmation, denying");
                    return ConfirmationDecision::Denied;
                }
                Err(e) => {
                    tracing::error!(error = %e, "could not read confirmation answer, denying");
                    return ConfirmationDecision::Denied;
                }
            }
        }
    }
}

/// Decides whether a call may run.
///
/// A call needs confirmation when its tool is declared high-risk or its
/// name is in the configured risk set.
pub struct ConfirmationGate {
    risk_set: HashSet<String>,
    channel: Arc<dyn ConfirmationChannel>,
    timeout: Option<Duration>,
}

impl ConfirmationGate {
    pub fn new(risk_set: impl IntoIterator<Item = String>, channel: Arc<dyn ConfirmationChannel>) -> Self {
        Self {
            risk_set: risk_set.into_iter().collect(),
            channel,
            timeout: None,
        }
    }

    /// Treat an unanswered request as denied after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn requires_confirmation(&self, tool_name: &str, risk: RiskLevel) -> bool {
        risk == RiskLevel::HighRisk || self.risk_set.contains(tool_name)
    }

    fn risk_reason(&self, record: &ToolCallRecord) -> String {
        if self.risk_set.contains(&record.tool_name) {
            format!("'{}' is listed as a high-risk tool", record.tool_name)
        } else {
            format!("'{}' is declared high-risk by its implementation", record.tool_name)
        }
    }

    pub async fn authorize(&self, record: &ToolCallRecord, agent_name: &str) -> ConfirmationOutcome {
        if !self.requires_confirmation(&record.tool_name, record.risk) {
            return ConfirmationOutcome::NotRequired;
        }

        let request = ConfirmationRequest {
            agent_name: agent_name.to_string(),
            call_id: record.call_id.clone(),
            tool_name: record.tool_name.clone(),
            arguments: record.arguments.clone(),
            risk_reason: self.risk_reason(record),
        };

        let decision = match self.timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.channel.request_confirmation(&request)).await {
                    Ok(decision) => decision,
                    Err(_) => {
                        tracing::warn!(
                            tool = %request.tool_name,
                            call_id = %request.call_id,
                            timeout_ms = limit.as_millis() as u64,
                            "confirmation timed out, denying"
                        );
                        ConfirmationDecision::Denied
                    }
                }
            }
            None => self.channel.request_confirmation(&request).await,
        };

        match decision {
            ConfirmationDecision::Approved => ConfirmationOutcome::Approved,
            ConfirmationDecision::Denied => ConfirmationOutcome::Denied,
        }
    }
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate")
            .field("risk_set", &self.risk_set)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
