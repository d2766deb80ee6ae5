// ABOUTME: run_shell_command: executes a command line through `sh -c` with a timeout.
// ABOUTME: High-risk; output reports exit code, stdout, and stderr so the model can react.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::{ParamSpec, ParamType, RiskLevel, ToolSchema};

use super::{Tool, ToolContext, resolve_path, str_arg};

pub struct RunShellCommand {
    timeout: Duration,
}

impl RunShellCommand {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Tool for RunShellCommand {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "run_shell_command",
            "Run a shell command and return its exit code, stdout, and stderr.",
            vec![
                ParamSpec::required("command", ParamType::String, "Command line passed to sh -c."),
                ParamSpec::optional(
                    "working_directory",
                    ParamType::Path,
                    "Directory to run in. Defaults to the session working directory.",
                ),
            ],
        )
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::HighRisk
    }

    async fn execute(&self, args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        let Some(command) = str_arg(&args, "command") else {
            bail!("command must be a string");
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = str_arg(&args, "working_directory") {
            cmd.current_dir(resolve_path(dir, ctx));
        } else if let Some(dir) = &ctx.working_dir {
            cmd.current_dir(dir);
        }

        tracing::warn!(agent = %ctx.agent_name, command, "running shell command");
        let child = cmd.spawn().context("failed to spawn sh")?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.context("failed to wait for command")?,
            Err(_) => bail!("command timed out after {} seconds", self.timeout.as_secs()),
        };

        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Ok(format!(
            "Exit code: {}\n--- stdout ---\n{}\n--- stderr ---\n{}",
            code,
            String::from_utf8_lossy(&output.stdout).trim_end(),
            String::from_utf8_lossy(&output.stderr).trim_end()
        ))
    }
}
