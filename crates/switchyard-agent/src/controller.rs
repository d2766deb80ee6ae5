// ABOUTME: Controller agent whose only tool delegates a task to one named specialist.
// ABOUTME: Specialists are built lazily per session and reused; the delegation chain rejects cycles.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::{ParamSpec, ParamType, ToolSchema};
use tokio::sync::Mutex;

use crate::agent::{Agent, AgentDeps, AgentError, AgentSpec, CancelHandle, RunOutcome};
use crate::context::DelegationChain;
use crate::roster::{Roster, SpecialistDef};
use crate::runtime::ModelBackend;
use crate::tools::{Tool, ToolContext, ToolRegistry, str_arg};

pub const DELEGATE_TOOL_NAME: &str = "delegate_task";
pub const CONTROLLER_NAME: &str = "ControllerAgent";

/// Longest allowed call chain, counting the controller.
pub const MAX_DELEGATION_DEPTH: usize = 4;

/// Produces the backend a specialist talks to.
pub trait BackendFactory: Send + Sync {
    fn backend_for(&self, def: &SpecialistDef) -> anyhow::Result<Arc<dyn ModelBackend>>;
}

/// Every specialist shares one backend.
pub struct SharedBackend(pub Arc<dyn ModelBackend>);

impl BackendFactory for SharedBackend {
    fn backend_for(&self, _def: &SpecialistDef) -> anyhow::Result<Arc<dyn ModelBackend>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Session-scoped options shared by the controller and its specialists.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,
}

/// Specialist agents for one session, created on first use.
pub struct SpecialistPool {
    roster: Roster,
    deps: AgentDeps,
    backends: Arc<dyn BackendFactory>,
    session: SessionOptions,
    agents: Mutex<HashMap<String, Arc<Mutex<Agent>>>>,
}

impl SpecialistPool {
    pub fn new(
        roster: Roster,
        deps: AgentDeps,
        backends: Arc<dyn BackendFactory>,
        session: SessionOptions,
    ) -> Self {
        Self {
            roster,
            deps,
            backends,
            session,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Fetch the named specialist, constructing it on first request.
    pub async fn get(&self, name: &str) -> anyhow::Result<Arc<Mutex<Agent>>> {
        let mut agents = self.agents.lock().await;
        if let Some(agent) = agents.get(name) {
            return Ok(Arc::clone(agent));
        }

        let Some(def) = self.roster.get(name) else {
            bail!(
                "Specialist agent '{}' not found. Please choose one of: {}",
                name,
                self.roster.names().join(", ")
            );
        };
        let backend = self.backends.backend_for(def)?;
        let mut agent = Agent::new(
            def.agent_spec(),
            backend,
            self.deps.clone(),
            self.session.session_id.as_deref(),
        );
        if let Some(dir) = &self.session.working_dir {
            agent.set_working_dir(dir.clone());
        }
        tracing::info!(specialist = name, "created specialist agent");

        let agent = Arc::new(Mutex::new(agent));
        agents.insert(name.to_string(), Arc::clone(&agent));
        Ok(agent)
    }

    /// Number of specialists constructed so far.
    pub async fn live_count(&self) -> usize {
        self.agents.lock().await.len()
    }
}

/// The controller's single tool.
pub struct DelegateTool {
    pool: Arc<SpecialistPool>,
}

impl DelegateTool {
    pub fn new(pool: Arc<SpecialistPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn schema(&self) -> ToolSchema {
        let names = self.pool.roster().names().join(", ");
        ToolSchema::new(
            DELEGATE_TOOL_NAME,
            "Delegate a task to exactly one specialist agent and return its answer.",
            vec![
                ParamSpec::required(
                    "agent_name",
                    ParamType::String,
                    &format!("Specialist to run. One of: {}", names),
                ),
                ParamSpec::required(
                    "task",
                    ParamType::String,
                    "The task for the specialist, including all needed context.",
                ),
            ],
        )
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let (Some(agent_name), Some(task)) = (str_arg(&args, "agent_name"), str_arg(&args, "task"))
        else {
            bail!("agent_name and task must be strings");
        };

        if ctx.chain.contains(agent_name) {
            tracing::warn!(specialist = agent_name, chain = %ctx.chain, "delegation cycle rejected");
            bail!(
                "Delegation cycle: '{}' is already running in this call chain ({})",
                agent_name,
                ctx.chain
            );
        }
        if ctx.chain.depth() >= MAX_DELEGATION_DEPTH {
            bail!(
                "Delegation depth limit of {} reached ({})",
                MAX_DELEGATION_DEPTH,
                ctx.chain
            );
        }

        let specialist = self.pool.get(agent_name).await?;
        let chain = ctx.chain.extend(agent_name);
        tracing::info!(specialist = agent_name, chain = %chain, "delegating task");

        let mut agent = specialist.lock().await;
        match agent.run_delegated(task, &chain, &ctx.cancel).await {
            Ok(outcome) => {
                for warning in &outcome.warnings {
                    tracing::warn!(specialist = agent_name, %warning, "specialist warning");
                }
                Ok(outcome.text)
            }
            Err(e) => bail!("Specialist '{}' failed: {}", agent_name, e.tagged()),
        }
    }
}

fn controller_prompt(roster: &Roster) -> String {
    let listing: Vec<String> = roster
        .iter()
        .map(|d| format!("- {}: {}", d.name, d.description))
        .collect();
    format!(
        "You are the controller of a multi-agent system. Decide which specialist is best \
         suited to the user's request and hand over the whole task with the {} tool. \
         Do not attempt the task yourself. When the specialist answers, relay its result.\n\n\
         Available specialists:\n{}",
        DELEGATE_TOOL_NAME,
        listing.join("\n")
    )
}

/// An agent that routes each task to one specialist.
pub struct Controller {
    agent: Agent,
    pool: Arc<SpecialistPool>,
}

impl Controller {
    /// `deps` is shared with the specialists; the controller itself gets a
    /// private registry holding only the delegation tool.
    pub fn new(
        roster: Roster,
        backend: Arc<dyn ModelBackend>,
        specialists: Arc<dyn BackendFactory>,
        deps: AgentDeps,
        session: SessionOptions,
    ) -> Result<Self, AgentError> {
        let prompt = controller_prompt(&roster);
        let pool = Arc::new(SpecialistPool::new(
            roster,
            deps.clone(),
            specialists,
            session.clone(),
        ));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DelegateTool::new(Arc::clone(&pool))))?;

        let controller_deps = AgentDeps {
            registry: Arc::new(registry),
            ..deps
        };
        let spec = AgentSpec {
            name: CONTROLLER_NAME.to_string(),
            description: "Routes tasks to specialists.".to_string(),
            system_prompt: prompt,
            allowed_tools: vec![DELEGATE_TOOL_NAME.to_string()],
        };
        let mut agent = Agent::new(spec, backend, controller_deps, session.session_id.as_deref());
        if let Some(dir) = session.working_dir {
            agent.set_working_dir(dir);
        }

        Ok(Self { agent, pool })
    }

    pub async fn run(&mut self, task: &str) -> Result<RunOutcome, AgentError> {
        let chain = DelegationChain::root(CONTROLLER_NAME);
        self.agent.run_in_chain(task, &chain).await
    }

    pub async fn load_state(&mut self) -> Result<(), AgentError> {
        self.agent.load_state().await
    }

    pub async fn save_state(&self) -> Result<(), AgentError> {
        self.agent.save_state().await
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn pool(&self) -> &SpecialistPool {
        &self.pool
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.agent.cancel_handle()
    }
}
