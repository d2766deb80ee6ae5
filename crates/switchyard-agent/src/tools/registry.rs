// ABOUTME: Process-wide tool registry: unique names, insertion-ordered, read-only once built.
// ABOUTME: list_available filters by an agent's allowed names while keeping registration order.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Tool, ToolDescriptor};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Tools available to agents. Built once at startup, then shared behind
/// an `Arc` and never mutated.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<ToolDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under the name its schema declares.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        self.register_descriptor(ToolDescriptor::from_tool(tool))
    }

    pub fn register_descriptor(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        let name = descriptor.schema.name.clone();
        if self.by_name.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, risk = ?descriptor.risk, "registered tool");
        self.by_name.insert(name, self.tools.len());
        self.tools.push(Arc::new(descriptor));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ToolDescriptor>, RegistryError> {
        self.by_name
            .get(name)
            .map(|&idx| Arc::clone(&self.tools[idx]))
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    /// Descriptors whose name is in `allowed`, in registration order.
    /// Names in `allowed` that are not registered are ignored.
    pub fn list_available<S: AsRef<str>>(&self, allowed: &[S]) -> Vec<Arc<ToolDescriptor>> {
        self.tools
            .iter()
            .filter(|d| allowed.iter().any(|a| a.as_ref() == d.schema.name))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|d| d.schema.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
