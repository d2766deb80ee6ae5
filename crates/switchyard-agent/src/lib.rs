// ABOUTME: Agent system for switchyard: run loop, gated tool dispatch, model backends, and delegation.
// ABOUTME: A controller agent routes operator tasks to specialist agents that own the real tools.

pub mod agent;
pub mod client;
pub mod config;
pub mod confirm;
pub mod context;
pub mod controller;
pub mod providers;
pub mod roster;
pub mod runtime;
pub mod testing;
pub mod tools;

pub use agent::{
    Agent, AgentDeps, AgentError, AgentPhase, AgentSpec, CancelHandle, RunLimits, RunOutcome,
    RunWarning,
};
pub use client::{EnvBackendFactory, create_backend};
pub use config::{ConfigError, SwitchyardConfig};
pub use confirm::{
    AutoApprove, AutoDeny, ConfirmationChannel, ConfirmationDecision, ConfirmationGate,
    ConfirmationRequest, SharedInput, TerminalPrompt,
};
pub use context::{ContextHints, DelegationChain};
pub use controller::{BackendFactory, Controller, SessionOptions, SharedBackend, SpecialistPool};
pub use roster::{Roster, RosterError, SpecialistDef};
pub use runtime::{BackendError, ExchangeRequest, ModelBackend, ModelReply, ModelTurn};
pub use tools::{RegistryError, Tool, ToolContext, ToolDescriptor, ToolRegistry, builtin_registry};
