// ABOUTME: Specialist roster: the named agents a controller may delegate to, loaded from YAML.
// ABOUTME: Validates names are unique, non-reserved, and that no specialist can delegate onward.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::AgentSpec;
use crate::controller::{CONTROLLER_NAME, DELEGATE_TOOL_NAME};
use crate::tools::ToolRegistry;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("cannot read roster {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid roster YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("roster defines no specialists")]
    Empty,

    #[error("specialist name defined twice: {0}")]
    DuplicateName(String),

    #[error("specialist name is reserved: {0}")]
    ReservedName(String),

    #[error("specialist {0} may not use delegate_task")]
    DelegationNotAllowed(String),

    #[error("specialist {agent} lists unknown tool {tool}")]
    UnknownTool { agent: String, tool: String },
}

/// One specialist definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistDef {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Provider override; the configured default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SpecialistDef {
    pub fn agent_spec(&self) -> AgentSpec {
        AgentSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            system_prompt: self.system_prompt.clone(),
            allowed_tools: self.allowed_tools.clone(),
        }
    }
}

#[derive(Deserialize)]
struct RosterFile {
    agents: Vec<SpecialistDef>,
}

/// Validated, ordered set of specialists.
#[derive(Debug, Clone, PartialEq)]
pub struct Roster {
    specialists: Vec<SpecialistDef>,
}

fn tool_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl Roster {
    pub fn new(specialists: Vec<SpecialistDef>) -> Result<Self, RosterError> {
        if specialists.is_empty() {
            return Err(RosterError::Empty);
        }
        let mut seen = std::collections::HashSet::new();
        for def in &specialists {
            if def.name == CONTROLLER_NAME {
                return Err(RosterError::ReservedName(def.name.clone()));
            }
            if !seen.insert(def.name.as_str()) {
                return Err(RosterError::DuplicateName(def.name.clone()));
            }
            if def.allowed_tools.iter().any(|t| t == DELEGATE_TOOL_NAME) {
                return Err(RosterError::DelegationNotAllowed(def.name.clone()));
            }
        }
        Ok(Self { specialists })
    }

    /// Parse a roster of the form `agents: [{name, description, ...}]`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RosterError> {
        let file: RosterFile = serde_yaml::from_str(yaml)?;
        Self::new(file.agents)
    }

    pub fn load(path: &Path) -> Result<Self, RosterError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| RosterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Specialists the built-in tools can serve.
    pub fn builtin() -> Self {
        Self {
            specialists: vec![
                SpecialistDef {
                    name: "CodingAgent".to_string(),
                    description: "Reads, writes, and runs code and text files.".to_string(),
                    system_prompt: "You are a specialist coding agent. You read, analyze, and modify \
                        source files and run build or test commands to check your work. Prefer small, \
                        verifiable edits and report what you changed."
                        .to_string(),
                    allowed_tools: tool_names(&[
                        "list_files",
                        "read_file",
                        "write_file",
                        "edit_file",
                        "create_directory",
                        "grep_files",
                        "find_files",
                        "run_shell_command",
                        "get_configured_token_limits",
                    ]),
                    provider: None,
                    model: None,
                },
                SpecialistDef {
                    name: "SysAdminAgent".to_string(),
                    description: "Inspects and administers the local system with shell commands."
                        .to_string(),
                    system_prompt: "You are a specialist system administration agent. You inspect \
                        processes, disks, services, and configuration using shell commands. Explain the \
                        effect of any command that changes system state before running it."
                        .to_string(),
                    allowed_tools: tool_names(&[
                        "list_files",
                        "read_file",
                        "grep_files",
                        "find_files",
                        "run_shell_command",
                        "list_processes",
                        "get_system_info",
                        "get_configured_token_limits",
                    ]),
                    provider: None,
                    model: None,
                },
            ],
        }
    }

    /// Check that every allowed tool is registered.
    pub fn check_tools(&self, registry: &ToolRegistry) -> Result<(), RosterError> {
        for def in &self.specialists {
            if let Some(tool) = def.allowed_tools.iter().find(|t| !registry.contains(t)) {
                return Err(RosterError::UnknownTool {
                    agent: def.name.clone(),
                    tool: tool.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SpecialistDef> {
        self.specialists.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.specialists.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpecialistDef> {
        self.specialists.iter()
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SwitchyardConfig;
    use crate::tools::builtin_registry;

    const YAML: &str = r#"
agents:
  - name: CodingAgent
    description: Writes code.
    system_prompt: You write code.
    allowed_tools: [read_file, write_file]
  - name: NetworkAgent
    description: Diagnoses networks.
    system_prompt: You diagnose networks.
    allowed_tools: [run_shell_command]
    provider: openai
    model: gpt-4o-mini
"#;

    #[test]
    fn parses_yaml_roster() {
        let roster = Roster::from_yaml_str(YAML).unwrap();
        assert_eq!(roster.names(), vec!["CodingAgent", "NetworkAgent"]);
        let net = roster.get("NetworkAgent").unwrap();
        assert_eq!(net.provider.as_deref(), Some("openai"));
        assert_eq!(net.agent_spec().allowed_tools, vec!["run_shell_command"]);
        assert!(roster.get("CodingAgent").unwrap().model.is_none());
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        let dup = SpecialistDef {
            name: "A".into(),
            description: "a".into(),
            system_prompt: "a".into(),
            allowed_tools: vec![],
            provider: None,
            model: None,
        };
        assert!(matches!(
            Roster::new(vec![dup.clone(), dup]),
            Err(RosterError::DuplicateName(name)) if name == "A"
        ));
        assert!(matches!(Roster::new(vec![]), Err(RosterError::Empty)));
    }

    #[test]
    fn rejects_controller_name_and_delegation() {
        let yaml = "agents:\n  - {name: ControllerAgent, description: x, system_prompt: x}\n";
        assert!(matches!(
            Roster::from_yaml_str(yaml),
            Err(RosterError::ReservedName(_))
        ));

        let yaml = "agents:\n  - {name: Sneaky, description: x, system_prompt: x, allowed_tools: [delegate_task]}\n";
        assert!(matches!(
            Roster::from_yaml_str(yaml),
            Err(RosterError::DelegationNotAllowed(_))
        ));
    }

    #[test]
    fn builtin_roster_only_uses_builtin_tools() {
        let registry = builtin_registry(&SwitchyardConfig::default()).unwrap();
        let roster = Roster::builtin();
        roster.check_tools(&registry).unwrap();
        assert_eq!(roster.names(), vec!["CodingAgent", "SysAdminAgent"]);
    }

    #[test]
    fn unknown_tool_is_reported() {
        let registry = builtin_registry(&SwitchyardConfig::default()).unwrap();
        let yaml = "agents:\n  - {name: A, description: x, system_prompt: x, allowed_tools: [teleport]}\n";
        let roster = Roster::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            roster.check_tools(&registry),
            Err(RosterError::UnknownTool { tool, .. }) if tool == "teleport"
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Roster::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, RosterError::Io { .. }));
    }
}
