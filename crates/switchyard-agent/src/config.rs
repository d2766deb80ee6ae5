// ABOUTME: Runtime configuration loaded from environment variables: state dir, budgets, risk set.
// ABOUTME: Invalid values are errors rather than silent defaults.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::agent::RunLimits;

pub const DEFAULT_MAX_GLOBAL_TOKENS: u64 = 1_000_000;
pub const DEFAULT_WARN_TOKEN_THRESHOLD: u64 = 800_000;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
pub const DEFAULT_TOOL_CONCURRENCY: usize = 4;
pub const DEFAULT_BACKEND_RETRIES: u32 = 2;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_HIGH_RISK_TOOLS: &[&str] = &["run_shell_command", "write_file", "edit_file", "delete_file"];

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid number: {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} must be at least {min}, got {value}")]
    TooSmall {
        var: &'static str,
        value: u64,
        min: u64,
    },

    #[error("WARN_TOKEN_THRESHOLD ({warn}) exceeds MAX_GLOBAL_TOKENS ({max})")]
    WarnAboveLimit { warn: u64, max: u64 },
}

/// Configuration for agents, the store, and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchyardConfig {
    pub state_dir: PathBuf,
    pub max_global_tokens: u64,
    pub warn_token_threshold: u64,
    pub high_risk_tools: Vec<String>,
    pub max_tool_rounds: usize,
    pub tool_concurrency: usize,
    pub backend_retries: u32,
    pub command_timeout: Duration,
    /// Hard limit on any single tool execution. `None` means no limit.
    pub tool_timeout: Option<Duration>,
    /// Unanswered confirmations are denied after this long.
    pub confirm_timeout: Option<Duration>,
    pub provider: String,
    pub model: Option<String>,
    pub agents_file: Option<PathBuf>,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(std::env::var("HOME").ok()),
            max_global_tokens: DEFAULT_MAX_GLOBAL_TOKENS,
            warn_token_threshold: DEFAULT_WARN_TOKEN_THRESHOLD,
            high_risk_tools: DEFAULT_HIGH_RISK_TOOLS.iter().map(|s| s.to_string()).collect(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_concurrency: DEFAULT_TOOL_CONCURRENCY,
            backend_retries: DEFAULT_BACKEND_RETRIES,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            tool_timeout: None,
            confirm_timeout: None,
            provider: "anthropic".to_string(),
            model: None,
            agents_file: None,
        }
    }
}

fn default_state_dir(home: Option<String>) -> PathBuf {
    home.map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".switchyard")
        .join("agent_state")
}

impl SwitchyardConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - SWITCHYARD_STATE_DIR (or AGENT_STATE_DIR): session store directory
    ///   (default: ~/.switchyard/agent_state)
    /// - MAX_GLOBAL_TOKENS: hard token limit per session, 0 disables (default: 1000000)
    /// - WARN_TOKEN_THRESHOLD: warning threshold, 0 disables (default: 800000)
    /// - HIGH_RISK_TOOLS: comma-separated tool names needing confirmation
    /// - MAX_TOOL_ROUNDS: rounds per run (default: 10)
    /// - TOOL_CONCURRENCY: concurrent tool calls per round (default: 4)
    /// - BACKEND_RETRIES: retries for transient backend errors (default: 2)
    /// - DEFAULT_COMMAND_TIMEOUT: shell command timeout in seconds (default: 120)
    /// - TOOL_TIMEOUT: hard limit on any tool execution in seconds, 0 or unset disables
    /// - CONFIRM_TIMEOUT: seconds before an unanswered confirmation is denied, 0 or unset disables
    /// - SWITCHYARD_PROVIDER: anthropic, openai, or ollama (default: anthropic)
    /// - SWITCHYARD_MODEL: model name (optional)
    /// - SWITCHYARD_AGENTS_FILE: YAML roster path (optional)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let state_dir = get("SWITCHYARD_STATE_DIR")
            .or_else(|| get("AGENT_STATE_DIR"))
            .map(PathBuf::from)
            .unwrap_or_else(|| default_state_dir(get("HOME")));

        let max_global_tokens = parse_or(get("MAX_GLOBAL_TOKENS"), "MAX_GLOBAL_TOKENS", DEFAULT_MAX_GLOBAL_TOKENS)?;
        let warn_token_threshold = parse_or(
            get("WARN_TOKEN_THRESHOLD"),
            "WARN_TOKEN_THRESHOLD",
            DEFAULT_WARN_TOKEN_THRESHOLD,
        )?;
        if max_global_tokens > 0 && warn_token_threshold > max_global_tokens {
            return Err(ConfigError::WarnAboveLimit {
                warn: warn_token_threshold,
                max: max_global_tokens,
            });
        }

        let high_risk_tools = match get("HIGH_RISK_TOOLS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => DEFAULT_HIGH_RISK_TOOLS.iter().map(|s| s.to_string()).collect(),
        };

        let max_tool_rounds = parse_or(get("MAX_TOOL_ROUNDS"), "MAX_TOOL_ROUNDS", DEFAULT_MAX_TOOL_ROUNDS as u64)?;
        at_least("MAX_TOOL_ROUNDS", max_tool_rounds, 1)?;
        let tool_concurrency = parse_or(get("TOOL_CONCURRENCY"), "TOOL_CONCURRENCY", DEFAULT_TOOL_CONCURRENCY as u64)?;
        at_least("TOOL_CONCURRENCY", tool_concurrency, 1)?;
        let backend_retries = parse_or(get("BACKEND_RETRIES"), "BACKEND_RETRIES", DEFAULT_BACKEND_RETRIES as u64)?;
        let command_timeout = parse_or(
            get("DEFAULT_COMMAND_TIMEOUT"),
            "DEFAULT_COMMAND_TIMEOUT",
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        at_least("DEFAULT_COMMAND_TIMEOUT", command_timeout, 1)?;
        let tool_timeout = optional_secs(get("TOOL_TIMEOUT"), "TOOL_TIMEOUT")?;
        let confirm_timeout = optional_secs(get("CONFIRM_TIMEOUT"), "CONFIRM_TIMEOUT")?;

        Ok(Self {
            state_dir,
            max_global_tokens,
            warn_token_threshold,
            high_risk_tools,
            max_tool_rounds: max_tool_rounds as usize,
            tool_concurrency: tool_concurrency as usize,
            backend_retries: u32::try_from(backend_retries).unwrap_or(u32::MAX),
            command_timeout: Duration::from_secs(command_timeout),
            tool_timeout,
            confirm_timeout,
            provider: get("SWITCHYARD_PROVIDER").unwrap_or_else(|| "anthropic".to_string()),
            model: get("SWITCHYARD_MODEL"),
            agents_file: get("SWITCHYARD_AGENTS_FILE").map(PathBuf::from),
        })
    }

    /// Run-loop limits derived from this configuration.
    pub fn run_limits(&self) -> RunLimits {
        RunLimits {
            max_rounds: self.max_tool_rounds,
            max_tokens: self.max_global_tokens,
            warn_tokens: self.warn_token_threshold,
            max_concurrency: self.tool_concurrency,
            backend_retries: self.backend_retries,
            tool_timeout: self.tool_timeout,
            ..RunLimits::default()
        }
    }
}

fn parse_or(raw: Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .replace('_', "")
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

/// Seconds as a duration; unset or zero means no limit.
fn optional_secs(raw: Option<String>, var: &'static str) -> Result<Option<Duration>, ConfigError> {
    let secs = parse_or(raw, var, 0)?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn at_least(var: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::TooSmall { var, value, min });
    }
    Ok(())
}
