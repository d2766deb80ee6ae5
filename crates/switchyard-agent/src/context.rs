// ABOUTME: Side-channel context passed to backends and tools: working dir, session, recent tools.
// ABOUTME: DelegationChain tracks which agents are active in the current call chain to reject cycles.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use switchyard_core::{Conversation, SessionState};

/// Number of recent tool names carried in hints.
pub const MAX_RECENT_TOOLS: usize = 10;

/// Optional context a backend may use; backends that ignore it are fine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextHints {
    pub working_dir: Option<PathBuf>,
    pub session_id: Option<String>,
    pub recent_tools: Vec<String>,
}

impl ContextHints {
    pub fn from_state(state: &SessionState, conversation: &Conversation) -> Self {
        Self {
            working_dir: state.working_dir.clone(),
            session_id: state.session_id.clone(),
            recent_tools: conversation.recent_tool_names(MAX_RECENT_TOOLS),
        }
    }

    /// Render the hints as a short block appended to a system prompt.
    /// Returns `None` when there is nothing worth telling the model.
    pub fn render(&self) -> Option<String> {
        let mut lines = Vec::new();
        if let Some(dir) = &self.working_dir {
            lines.push(format!("Current working directory: {}", dir.display()));
        }
        if !self.recent_tools.is_empty() {
            lines.push(format!("Recently used tools: {}", self.recent_tools.join(", ")));
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

/// Ordered, immutable list of agent names active in one call chain,
/// outermost first. Extending returns a new chain; the original is
/// untouched so sibling delegations never see each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegationChain {
    names: Arc<[String]>,
}

impl DelegationChain {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            names: Arc::from(vec![name.into()]),
        }
    }

    pub fn extend(&self, name: impl Into<String>) -> Self {
        let mut names = self.names.to_vec();
        names.push(name.into());
        Self {
            names: Arc::from(names),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// Number of agents in the chain.
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl fmt::Display for DelegationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(" -> "))
    }
}
