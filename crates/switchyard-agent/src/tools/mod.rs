// ABOUTME: The Tool trait every tool implementation satisfies, plus the immutable ToolDescriptor.
// ABOUTME: builtin_registry wires the bundled filesystem, search, shell, and host tools into a fresh registry.

pub mod fs;
pub mod limits;
pub mod process;
pub mod registry;
pub mod search;
pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::{RiskLevel, ToolSchema};

use crate::agent::CancelHandle;
use crate::config::SwitchyardConfig;
use crate::context::DelegationChain;

pub use registry::{RegistryError, ToolRegistry};

/// What a tool sees about the agent invoking it.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent_name: String,
    pub session_id: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub chain: DelegationChain,
    /// Cancellation handle of the agent at the root of `chain`.
    pub cancel: CancelHandle,
}

/// A callable capability exposed to models.
///
/// Errors are never fatal to a run: the loop folds them into a failed
/// tool result so the model can try something else.
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    fn risk(&self) -> RiskLevel {
        RiskLevel::Normal
    }

    async fn execute(
        &self,
        args: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<String, anyhow::Error>;
}

/// Registered form of a tool: schema and risk captured once at
/// registration, plus the handle used to execute it.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub schema: ToolSchema,
    pub risk: RiskLevel,
    pub handle: Arc<dyn Tool>,
}

impl ToolDescriptor {
    pub fn from_tool(handle: Arc<dyn Tool>) -> Self {
        Self {
            schema: handle.schema(),
            risk: handle.risk(),
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("schema", &self.schema)
            .field("risk", &self.risk)
            .finish_non_exhaustive()
    }
}

/// Registry holding the bundled tools, in a fixed order.
pub fn builtin_registry(config: &SwitchyardConfig) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(fs::ListFiles))?;
    registry.register(Arc::new(fs::ReadFile))?;
    registry.register(Arc::new(fs::WriteFile))?;
    registry.register(Arc::new(fs::EditFile))?;
    registry.register(Arc::new(fs::CreateDirectory))?;
    registry.register(Arc::new(search::GrepFiles))?;
    registry.register(Arc::new(search::FindFiles))?;
    registry.register(Arc::new(shell::RunShellCommand::new(config.command_timeout)))?;
    registry.register(Arc::new(process::ListProcesses))?;
    registry.register(Arc::new(process::GetSystemInfo))?;
    registry.register(Arc::new(limits::GetConfiguredTokenLimits::new(
        config.max_global_tokens,
        config.warn_token_threshold,
    )))?;
    Ok(registry)
}

/// Fetch a string argument, treating null as absent.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

/// Resolve a path argument against the context's working directory.
pub(crate) fn resolve_path(raw: &str, ctx: &ToolContext) -> PathBuf {
    let path = PathBuf::from(raw);
    match (&ctx.working_dir, path.is_relative()) {
        (Some(base), true) => base.join(path),
        _ => path,
    }
}
