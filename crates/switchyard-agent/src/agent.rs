// ABOUTME: The agent run loop: exchange with a backend, dispatch tool calls, fold results back in.
// ABOUTME: Enforces the token budget, round limit, confirmation gate, and persists state at exit points.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tracing::Instrument;

use switchyard_core::{
    Conversation, ConversationError, SessionKey, SessionState, ToolCallRecord, ToolCallRequest,
    ToolCallResult, ToolSchema,
};
use switchyard_store::{SessionRecord, SessionStore, StoreError};

use crate::confirm::ConfirmationGate;
use crate::context::{ContextHints, DelegationChain};
use crate::runtime::{BackendError, ExchangeRequest, ModelBackend, ModelReply, ModelTurn};
use crate::tools::{RegistryError, ToolContext, ToolDescriptor, ToolRegistry};

/// Static definition of an agent: who it is and which tools it may use.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
}

impl AgentSpec {
    pub fn new(name: &str, system_prompt: &str, allowed_tools: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            system_prompt: system_prompt.to_string(),
            allowed_tools: allowed_tools.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn allows(&self, tool_name: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool_name)
    }
}

/// Limits applied to every run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunLimits {
    /// Backend exchanges per run.
    pub max_rounds: usize,
    /// Hard cap on cumulative session tokens; 0 disables.
    pub max_tokens: u64,
    /// Warning threshold on cumulative session tokens; 0 disables.
    pub warn_tokens: u64,
    /// Tool calls executing at once within a round.
    pub max_concurrency: usize,
    /// Retries after a transient backend failure.
    pub backend_retries: u32,
    /// Delay before the first retry; doubles on each subsequent one.
    pub retry_backoff: Duration,
    /// Per-call execution timeout.
    pub tool_timeout: Option<Duration>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_tokens: 1_000_000,
            warn_tokens: 800_000,
            max_concurrency: 4,
            backend_retries: 2,
            retry_backoff: Duration::from_millis(500),
            tool_timeout: None,
        }
    }
}

/// Shared collaborators an agent runs against.
#[derive(Clone)]
pub struct AgentDeps {
    pub registry: Arc<ToolRegistry>,
    pub gate: Arc<ConfirmationGate>,
    pub store: Option<Arc<dyn SessionStore>>,
    pub limits: RunLimits,
}

impl AgentDeps {
    pub fn new(registry: Arc<ToolRegistry>, gate: Arc<ConfirmationGate>) -> Self {
        Self {
            registry,
            gate,
            store: None,
            limits: RunLimits::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Where the run loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Idle,
    AwaitingModel,
    ToolDispatch,
    Terminal,
    Error,
}

/// Non-fatal conditions reported alongside an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunWarning {
    /// Cumulative tokens reached the warning threshold.
    TokenThreshold { used: u64, threshold: u64 },
    /// The answer was computed but saving state failed.
    PersistenceFailed(String),
}

impl std::fmt::Display for RunWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunWarning::TokenThreshold { used, threshold } => write!(
                f,
                "token usage {} has reached the warning threshold of {}",
                used, threshold
            ),
            RunWarning::PersistenceFailed(reason) => {
                write!(f, "answer computed but session state was not saved: {}", reason)
            }
        }
    }
}

/// A completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub text: String,
    pub warnings: Vec<RunWarning>,
}

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("token budget exceeded: {used} tokens used, limit is {limit}")]
    TokenBudgetExceeded { used: u64, limit: u64 },

    #[error("round limit exceeded after {rounds} rounds")]
    RoundLimitExceeded { rounds: usize },

    #[error("backend unavailable after {attempts} attempt(s): {source}")]
    BackendUnavailable {
        attempts: u32,
        #[source]
        source: BackendError,
    },

    #[error("backend rejected the request: {0}")]
    Backend(#[source] BackendError),

    #[error("session persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("operation cancelled by user")]
    Cancelled,

    #[error("conversation invariant violated: {0}")]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AgentError {
    /// The error as a tagged string that can't be mistaken for an answer.
    pub fn tagged(&self) -> String {
        format!("[Error: {}]", self)
    }
}

/// Cooperative cancellation flag, checked at the top of each round.
/// In-flight tool calls are allowed to finish. Delegated runs also watch
/// the handle of the agent that started the chain.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Drop a cancellation no run has observed yet.
    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Observe and clear a pending cancellation.
    fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }
}

/// One agent bound to a backend, a tool subset, and a session.
pub struct Agent {
    spec: AgentSpec,
    backend: Arc<dyn ModelBackend>,
    deps: AgentDeps,
    key: SessionKey,
    conversation: Conversation,
    state: SessionState,
    working_dir: Option<PathBuf>,
    phase: AgentPhase,
    cancel: CancelHandle,
}

impl Agent {
    pub fn new(
        spec: AgentSpec,
        backend: Arc<dyn ModelBackend>,
        deps: AgentDeps,
        session_id: Option<&str>,
    ) -> Self {
        let key = SessionKey::new(session_id, spec.name.clone());
        Self {
            spec,
            backend,
            deps,
            key,
            conversation: Conversation::new(),
            state: SessionState::new(session_id),
            working_dir: None,
            phase: AgentPhase::Idle,
            cancel: CancelHandle::default(),
        }
    }

    /// Pin the working-directory override. It is applied now and again
    /// after every load, so it survives reloading persisted state.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.set_working_dir(dir);
        self
    }

    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.state.working_dir = Some(dir.clone());
        self.working_dir = Some(dir);
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Replace in-memory state with the persisted record for this key.
    /// A missing record yields an empty conversation and default state.
    pub async fn load_state(&mut self) -> Result<(), AgentError> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        let record = store.load(&self.key).await?;
        self.conversation = record.conversation;
        self.state = record.state;
        if self.state.session_id.is_none() {
            self.state.session_id = self.key.session_id.clone();
        }
        if let Some(dir) = &self.working_dir {
            self.state.working_dir = Some(dir.clone());
        }
        tracing::debug!(
            agent = %self.spec.name,
            key = %self.key,
            messages = self.conversation.len(),
            tokens = self.state.total_tokens(),
            "loaded session state"
        );
        Ok(())
    }

    /// Write the current conversation and state to the store.
    pub async fn save_state(&self) -> Result<(), AgentError> {
        let Some(store) = &self.deps.store else {
            return Ok(());
        };
        let record = SessionRecord {
            conversation: self.conversation.clone(),
            state: self.state.clone(),
        };
        store.save(&self.key, &record).await?;
        tracing::debug!(agent = %self.spec.name, key = %self.key, "saved session state");
        Ok(())
    }

    /// Run a task as the outermost agent of a call chain.
    pub async fn run(&mut self, task: &str) -> Result<RunOutcome, AgentError> {
        let chain = DelegationChain::root(self.spec.name.clone());
        self.run_in_chain(task, &chain).await
    }

    /// Run a task on behalf of the agents already in `chain`. The chain
    /// must end with this agent's name.
    pub async fn run_in_chain(
        &mut self,
        task: &str,
        chain: &DelegationChain,
    ) -> Result<RunOutcome, AgentError> {
        self.run_instrumented(task, chain, None).await
    }

    /// Like [`Agent::run_in_chain`], but also stops at the next round
    /// boundary once `root` is cancelled. `root` is left set so the agent
    /// that owns it sees the cancellation too.
    pub async fn run_delegated(
        &mut self,
        task: &str,
        chain: &DelegationChain,
        root: &CancelHandle,
    ) -> Result<RunOutcome, AgentError> {
        self.run_instrumented(task, chain, Some(root)).await
    }

    async fn run_instrumented(
        &mut self,
        task: &str,
        chain: &DelegationChain,
        root: Option<&CancelHandle>,
    ) -> Result<RunOutcome, AgentError> {
        let span = tracing::info_span!(
            "agent_run",
            agent = %self.spec.name,
            session = self.key.session_id.as_deref().unwrap_or("<shared>"),
            chain = %chain,
        );
        self.run_inner(task, chain, root).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        task: &str,
        chain: &DelegationChain,
        root: Option<&CancelHandle>,
    ) -> Result<RunOutcome, AgentError> {
        self.phase = AgentPhase::Idle;
        if let Err(e) = self.load_state().await {
            self.phase = AgentPhase::Error;
            tracing::error!(error = %e, "could not load session state");
            return Err(e);
        }

        self.conversation.push_user(task);
        self.state.touch();

        let mut warnings = Vec::new();
        match self.drive(chain, root, &mut warnings).await {
            Ok(text) => {
                self.phase = AgentPhase::Terminal;
                if let Err(e) = self.save_state().await {
                    tracing::warn!(error = %e, "answer computed but state not saved");
                    warnings.push(RunWarning::PersistenceFailed(e.to_string()));
                }
                tracing::info!(
                    tokens = self.state.total_tokens(),
                    warnings = warnings.len(),
                    "run finished"
                );
                Ok(RunOutcome { text, warnings })
            }
            Err(err) => {
                self.phase = AgentPhase::Error;
                tracing::error!(error = %err, "run failed");
                if let Err(save_err) = self.save_state().await {
                    tracing::warn!(error = %save_err, "best-effort save after failure also failed");
                }
                Err(err)
            }
        }
    }

    /// Rounds of exchange and dispatch until a final answer or a fatal error.
    async fn drive(
        &mut self,
        chain: &DelegationChain,
        root: Option<&CancelHandle>,
        warnings: &mut Vec<RunWarning>,
    ) -> Result<String, AgentError> {
        let tools = self.deps.registry.list_available(&self.spec.allowed_tools);
        let schemas: Vec<ToolSchema> = tools.iter().map(|d| d.schema.clone()).collect();
        let mut seen_ids: HashSet<String> = self
            .conversation
            .messages()
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.call_id.clone()))
            .collect();
        let mut warned = false;

        for round in 1..=self.deps.limits.max_rounds {
            let root_cancelled = root.is_some_and(CancelHandle::is_cancelled);
            if self.cancel.take() || root_cancelled {
                tracing::info!(round, root_cancelled, "run cancelled");
                return Err(AgentError::Cancelled);
            }
            self.check_budget(&mut warned, warnings)?;

            self.phase = AgentPhase::AwaitingModel;
            tracing::debug!(round, messages = self.conversation.len(), "awaiting model");
            let turn = self.exchange_with_retry(&schemas).await?;
            self.state.record_usage(turn.usage);

            match turn.reply {
                ModelReply::Final(text) => {
                    self.conversation.push_agent_text(text.clone());
                    return Ok(text);
                }
                ModelReply::ToolCalls { text, calls } => {
                    let calls = assign_call_ids(calls, &mut seen_ids);
                    self.conversation.push_tool_calls(text, calls.clone());

                    self.phase = AgentPhase::ToolDispatch;
                    tracing::debug!(round, calls = calls.len(), "dispatching tool calls");
                    let results = self.dispatch_all(&calls, chain, root).await;
                    for result in results {
                        self.conversation.push_tool_result(result)?;
                    }
                }
            }
        }

        Err(AgentError::RoundLimitExceeded {
            rounds: self.deps.limits.max_rounds,
        })
    }

    fn check_budget(&self, warned: &mut bool, warnings: &mut Vec<RunWarning>) -> Result<(), AgentError> {
        let used = self.state.total_tokens();
        let limits = &self.deps.limits;
        if limits.max_tokens > 0 && used >= limits.max_tokens {
            return Err(AgentError::TokenBudgetExceeded {
                used,
                limit: limits.max_tokens,
            });
        }
        if limits.warn_tokens > 0 && used >= limits.warn_tokens && !*warned {
            *warned = true;
            tracing::warn!(used, threshold = limits.warn_tokens, "token usage past warning threshold");
            warnings.push(RunWarning::TokenThreshold {
                used,
                threshold: limits.warn_tokens,
            });
        }
        Ok(())
    }

    async fn exchange_with_retry(&self, schemas: &[ToolSchema]) -> Result<ModelTurn, AgentError> {
        let hints = ContextHints::from_state(&self.state, &self.conversation);
        let retries = self.deps.limits.backend_retries;
        let mut backoff = self.deps.limits.retry_backoff;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let request = ExchangeRequest {
                system_prompt: &self.spec.system_prompt,
                conversation: &self.conversation,
                tools: schemas,
                hints: &hints,
            };
            match self.backend.exchange(request).await {
                Ok(turn) => return Ok(turn),
                Err(e) if e.is_retryable() && attempts <= retries => {
                    tracing::warn!(
                        provider = self.backend.provider_name(),
                        attempt = attempts,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "transient backend error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) if e.is_retryable() => {
                    return Err(AgentError::BackendUnavailable { attempts, source: e });
                }
                Err(e) => return Err(AgentError::Backend(e)),
            }
        }
    }

    fn tool_context(&self, chain: &DelegationChain, root: Option<&CancelHandle>) -> ToolContext {
        ToolContext {
            agent_name: self.spec.name.clone(),
            session_id: self.key.session_id.clone(),
            working_dir: self.state.working_dir.clone(),
            chain: chain.clone(),
            cancel: root.cloned().unwrap_or_else(|| self.cancel.clone()),
        }
    }

    /// Dispatch one turn's calls with bounded concurrency. Results come
    /// back in call order regardless of completion order.
    async fn dispatch_all(
        &self,
        calls: &[ToolCallRequest],
        chain: &DelegationChain,
        root: Option<&CancelHandle>,
    ) -> Vec<ToolCallResult> {
        let ctx = self.tool_context(chain, root);
        let permits = Semaphore::new(self.deps.limits.max_concurrency.max(1));
        let pending: Vec<_> = calls
            .iter()
            .map(|call| self.dispatch_bounded(call, &ctx, &permits))
            .collect();
        join_all(pending).await
    }

    async fn dispatch_bounded(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolContext,
        permits: &Semaphore,
    ) -> ToolCallResult {
        let _permit = permits.acquire().await.ok();
        self.dispatch_one(call, ctx).await.into_result()
    }

    /// Resolve one call into exactly one record. Never fails: every
    /// problem becomes a failed or declined result.
    async fn dispatch_one(&self, call: &ToolCallRequest, ctx: &ToolContext) -> ToolCallRecord {
        let mut record = ToolCallRecord::from_request(call);
        let name = call.tool_name.as_str();

        if !self.spec.allows(name) {
            tracing::warn!(tool = name, call_id = %call.call_id, "tool not allowed for this agent");
            return record.fail(format!(
                "Error: Tool '{}' is not available to {}. Available tools: {}.",
                name,
                self.spec.name,
                self.spec.allowed_tools.join(", ")
            ));
        }

        let descriptor = match self.deps.registry.lookup(name) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(tool = name, call_id = %call.call_id, "tool allowed but not registered");
                return record.fail(format!("Error: {}.", e));
            }
        };
        record.risk = descriptor.risk;

        let mut args = match &call.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            _ => {
                return record.fail(format!(
                    "Error: Arguments for tool '{}' must be a JSON object.",
                    name
                ));
            }
        };
        self.fill_path_defaults(&descriptor, &mut args);
        record.arguments = Value::Object(args.clone());

        let missing = descriptor.schema.missing_required(&args);
        if !missing.is_empty() {
            return record.fail(format!(
                "Error: Missing required parameter(s) for tool '{}': {}.",
                name,
                missing.join(", ")
            ));
        }

        record.confirmation = self.deps.gate.authorize(&record, &self.spec.name).await;
        if !record.confirmation.allows_execution() {
            tracing::info!(tool = name, call_id = %call.call_id, "operator declined tool call");
            return record.decline(format!("Operation declined by operator for tool: {}.", name));
        }

        tracing::debug!(tool = name, call_id = %call.call_id, "executing tool");
        let execution = descriptor.handle.execute(args, ctx);
        let outcome = match self.deps.limits.tool_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!("timed out after {} ms", limit.as_millis())),
            },
            None => execution.await,
        };

        match outcome {
            Ok(output) => record.succeed(output),
            Err(e) => {
                tracing::warn!(tool = name, call_id = %call.call_id, error = %e, "tool failed");
                record.fail(format!("Error executing tool '{}': {:#}", name, e))
            }
        }
    }

    /// Default omitted optional path parameters to the working directory.
    fn fill_path_defaults(&self, descriptor: &ToolDescriptor, args: &mut Map<String, Value>) {
        let Some(dir) = &self.state.working_dir else {
            return;
        };
        for param in descriptor.schema.path_params().filter(|p| !p.required) {
            let omitted = args.get(&param.name).is_none_or(Value::is_null);
            if omitted {
                args.insert(
                    param.name.clone(),
                    Value::String(dir.to_string_lossy().into_owned()),
                );
            }
        }
    }
}

/// Keep backend ids unless empty or already used; otherwise mint fresh ones.
fn assign_call_ids(calls: Vec<ToolCallRequest>, seen: &mut HashSet<String>) -> Vec<ToolCallRequest> {
    calls
        .into_iter()
        .map(|mut call| {
            if call.call_id.trim().is_empty() || seen.contains(&call.call_id) {
                call.call_id = ToolCallRequest::fresh_call_id();
            }
            seen.insert(call.call_id.clone());
            call
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmationDecision;
    use crate::testing::{FixedTool, RecordingChannel, ScriptedBackend};
    use serde_json::json;
    use switchyard_core::{RiskLevel, Role, TokenUsage, ToolStatus};
    use switchyard_store::MemorySessionStore;

    fn deps_with(tools: Vec<Arc<FixedTool>>, decision: ConfirmationDecision) -> AgentDeps {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        let gate = ConfirmationGate::new(Vec::new(), Arc::new(RecordingChannel::always(decision)));
        AgentDeps::new(Arc::new(registry), Arc::new(gate)).with_limits(RunLimits {
            retry_backoff: Duration::from_millis(1),
            ..RunLimits::default()
        })
    }

    fn spec(tools: &[&str]) -> AgentSpec {
        AgentSpec::new("CodingAgent", "You write code.", tools)
    }

    #[tokio::test]
    async fn final_answer_without_tools() {
        let backend = Arc::new(ScriptedBackend::new().then_final("hello"));
        let mut agent = Agent::new(
            spec(&[]),
            backend.clone(),
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );

        let outcome = agent.run("say hello").await.unwrap();
        assert_eq!(outcome.text, "hello");
        assert!(outcome.warnings.is_empty());
        assert_eq!(agent.phase(), AgentPhase::Terminal);
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(backend.exchange_count(), 1);
    }

    #[tokio::test]
    async fn tool_error_is_folded_in_and_run_continues() {
        let tool = Arc::new(FixedTool::failing("read_file", "disk on fire"));
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![ToolCallRequest::new("c1", "read_file", json!({}))])
                .then_final("could not read"),
        );
        let mut agent = Agent::new(
            spec(&["read_file"]),
            backend,
            deps_with(vec![tool], ConfirmationDecision::Approved),
            None,
        );

        let outcome = agent.run("read it").await.unwrap();
        assert_eq!(outcome.text, "could not read");
        let result = agent.conversation().messages()[2].tool_result.clone().unwrap();
        assert_eq!(result.status, ToolStatus::Failed);
        assert!(result.content.contains("Error executing tool 'read_file'"));
        assert!(result.content.contains("disk on fire"));
    }

    #[tokio::test]
    async fn non_object_arguments_fail_without_execution() {
        let tool = Arc::new(FixedTool::new("list_files", "listing"));
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![ToolCallRequest::new("c1", "list_files", json!("oops"))])
                .then_final("ok"),
        );
        let mut agent = Agent::new(
            spec(&["list_files"]),
            backend,
            deps_with(vec![tool.clone()], ConfirmationDecision::Approved),
            None,
        );

        agent.run("list").await.unwrap();
        assert_eq!(tool.call_count(), 0);
        let result = agent.conversation().messages()[2].tool_result.clone().unwrap();
        assert!(result.content.contains("must be a JSON object"));
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_without_execution() {
        let tool = Arc::new(FixedTool::new("read_file", "contents").with_required_param("file_path"));
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![ToolCallRequest::new("c1", "read_file", json!({}))])
                .then_final("ok"),
        );
        let mut agent = Agent::new(
            spec(&["read_file"]),
            backend,
            deps_with(vec![tool.clone()], ConfirmationDecision::Approved),
            None,
        );

        agent.run("read").await.unwrap();
        assert_eq!(tool.call_count(), 0);
        let result = agent.conversation().messages()[2].tool_result.clone().unwrap();
        assert!(result.content.contains("file_path"));
    }

    #[tokio::test]
    async fn duplicate_and_empty_call_ids_are_replaced() {
        let tool = Arc::new(FixedTool::new("list_files", "listing"));
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![
                    ToolCallRequest::new("dup", "list_files", json!({})),
                    ToolCallRequest::new("dup", "list_files", json!({})),
                    ToolCallRequest::new("", "list_files", json!({})),
                ])
                .then_final("ok"),
        );
        let mut agent = Agent::new(
            spec(&["list_files"]),
            backend,
            deps_with(vec![tool], ConfirmationDecision::Approved),
            None,
        );

        agent.run("list").await.unwrap();
        let calls = &agent.conversation().messages()[1].tool_calls;
        let ids: HashSet<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(calls[0].call_id, "dup");
        assert!(calls[1].call_id.starts_with("call_"));
        assert!(calls[2].call_id.starts_with("call_"));
        agent.conversation().validate().unwrap();
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_then_surface() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_error(BackendError::RateLimited)
                .then_final("after retry"),
        );
        let mut agent = Agent::new(
            spec(&[]),
            backend.clone(),
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );
        assert_eq!(agent.run("go").await.unwrap().text, "after retry");
        assert_eq!(backend.exchange_count(), 2);

        let backend = Arc::new(
            ScriptedBackend::new()
                .then_error(BackendError::Unavailable("down".into()))
                .then_error(BackendError::Unavailable("down".into()))
                .then_error(BackendError::Unavailable("down".into())),
        );
        let mut agent = Agent::new(
            spec(&[]),
            backend.clone(),
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );
        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err, AgentError::BackendUnavailable { attempts: 3, .. }));
        assert_eq!(agent.phase(), AgentPhase::Error);
    }

    #[tokio::test]
    async fn non_retryable_backend_error_is_not_retried() {
        let backend = Arc::new(
            ScriptedBackend::new().then_error(BackendError::InvalidRequest("bad schema".into())),
        );
        let mut agent = Agent::new(
            spec(&[]),
            backend.clone(),
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );
        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err, AgentError::Backend(BackendError::InvalidRequest(_))));
        assert_eq!(backend.exchange_count(), 1);
        assert!(err.tagged().starts_with("[Error: "));
    }

    #[tokio::test]
    async fn warning_threshold_is_reported_once() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_turn(ModelTurn::tool_calls(
                    vec![ToolCallRequest::new("c1", "list_files", json!({}))],
                    TokenUsage::new(60, 0),
                ))
                .then_final("done"),
        );
        let mut deps = deps_with(
            vec![Arc::new(FixedTool::new("list_files", "x"))],
            ConfirmationDecision::Approved,
        );
        deps.limits.max_tokens = 1_000;
        deps.limits.warn_tokens = 50;
        let mut agent = Agent::new(spec(&["list_files"]), backend, deps, None);

        let outcome = agent.run("go").await.unwrap();
        assert_eq!(
            outcome.warnings,
            vec![RunWarning::TokenThreshold { used: 60, threshold: 50 }]
        );
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_round() {
        let backend = Arc::new(ScriptedBackend::new().then_final("never"));
        let mut agent = Agent::new(
            spec(&[]),
            backend.clone(),
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );
        agent.cancel_handle().cancel();

        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert_eq!(backend.exchange_count(), 0);

        // The flag is consumed; the next run proceeds.
        assert_eq!(agent.run("again").await.unwrap().text, "never");
    }

    #[tokio::test]
    async fn cleared_cancellation_is_not_observed() {
        let backend = Arc::new(ScriptedBackend::new().then_final("ran"));
        let mut agent = Agent::new(
            spec(&[]),
            backend,
            deps_with(Vec::new(), ConfirmationDecision::Approved),
            None,
        );
        let handle = agent.cancel_handle();
        handle.cancel();
        assert!(handle.is_cancelled());
        handle.clear();

        assert_eq!(agent.run("go").await.unwrap().text, "ran");
    }

    #[tokio::test]
    async fn state_is_reloaded_and_saved_through_the_store() {
        let store = Arc::new(MemorySessionStore::new());
        let deps = deps_with(Vec::new(), ConfirmationDecision::Approved).with_store(store.clone());

        let backend = Arc::new(
            ScriptedBackend::new()
                .then_turn(ModelTurn::final_text("one", TokenUsage::new(3, 2)))
                .then_turn(ModelTurn::final_text("two", TokenUsage::new(1, 1))),
        );
        let mut first = Agent::new(spec(&[]), backend.clone(), deps.clone(), Some("s1"));
        first.run("first").await.unwrap();

        // A fresh instance for the same key continues the same conversation.
        let mut second = Agent::new(spec(&[]), backend, deps, Some("s1"));
        second.run("second").await.unwrap();
        assert_eq!(second.conversation().len(), 4);
        assert_eq!(second.state().total_tokens(), 7);

        let saved = store.load(second.key()).await.unwrap();
        assert_eq!(saved.conversation.len(), 4);
        assert_eq!(saved.conversation.messages()[0].role, Role::User);
    }

    #[tokio::test]
    async fn pinned_working_dir_survives_reload() {
        let store = Arc::new(MemorySessionStore::new());
        let deps = deps_with(Vec::new(), ConfirmationDecision::Approved).with_store(store);
        let backend = Arc::new(ScriptedBackend::new().then_final("ok"));
        let mut agent =
            Agent::new(spec(&[]), backend.clone(), deps, Some("s")).with_working_dir("/workspace");

        agent.run("go").await.unwrap();
        assert_eq!(agent.state().working_dir, Some(PathBuf::from("/workspace")));
        let hints = &backend.requests()[0].hints;
        assert_eq!(hints.working_dir, Some(PathBuf::from("/workspace")));
    }

    #[tokio::test]
    async fn declared_risk_reaches_the_gate() {
        let tool = Arc::new(FixedTool::new("write_file", "wrote").with_risk(RiskLevel::HighRisk));
        let channel = Arc::new(RecordingChannel::always(ConfirmationDecision::Approved));
        let mut registry = ToolRegistry::new();
        registry.register(tool.clone()).unwrap();
        let deps = AgentDeps::new(
            Arc::new(registry),
            Arc::new(ConfirmationGate::new(Vec::new(), channel.clone())),
        );
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![ToolCallRequest::new(
                    "c1",
                    "write_file",
                    json!({"file_path": "a", "content": "b"}),
                )])
                .then_final("written"),
        );
        let mut agent = Agent::new(spec(&["write_file"]), backend, deps, None);

        agent.run("write").await.unwrap();
        assert_eq!(channel.requests().len(), 1);
        assert_eq!(tool.call_count(), 1);
    }

    #[tokio::test]
    async fn tool_timeout_becomes_failed_result() {
        let tool = Arc::new(FixedTool::new("run_shell_command", "late").with_delay(Duration::from_secs(5)));
        let mut deps = deps_with(vec![tool], ConfirmationDecision::Approved);
        deps.limits.tool_timeout = Some(Duration::from_millis(20));
        let backend = Arc::new(
            ScriptedBackend::new()
                .then_tool_calls(vec![ToolCallRequest::new("c1", "run_shell_command", json!({}))])
                .then_final("gave up"),
        );
        let mut agent = Agent::new(spec(&["run_shell_command"]), backend, deps, None);

        agent.run("go").await.unwrap();
        let result = agent.conversation().messages()[2].tool_result.clone().unwrap();
        assert_eq!(result.status, ToolStatus::Failed);
        assert!(result.content.contains("timed out"));
    }

    #[test]
    fn assign_call_ids_keeps_unique_ids() {
        let mut seen = HashSet::from(["old".to_string()]);
        let calls = assign_call_ids(
            vec![
                ToolCallRequest::new("a", "t", json!({})),
                ToolCallRequest::new("old", "t", json!({})),
            ],
            &mut seen,
        );
        assert_eq!(calls[0].call_id, "a");
        assert_ne!(calls[1].call_id, "old");
        assert!(seen.contains("a"));
    }
}
