// ABOUTME: Host inspection tools: list_processes (ps aux, optionally regex-filtered) and get_system_info.
// ABOUTME: Commands run without a shell and under a short timeout.

use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::{Map, Value};
use switchyard_core::{ParamSpec, ParamType, ToolSchema};

use super::{Tool, ToolContext, str_arg};

/// Limit for each inspection command.
pub const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);

async fn capture(program: &str, args: &[&str]) -> anyhow::Result<Output> {
    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {}", program))?;
    match tokio::time::timeout(INSPECT_TIMEOUT, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("failed to wait for {}", program)),
        Err(_) => bail!("{} timed out after {} seconds", program, INSPECT_TIMEOUT.as_secs()),
    }
}

pub struct ListProcesses;

#[async_trait]
impl Tool for ListProcesses {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_processes",
            "List running processes (ps aux), optionally keeping only lines that match a regular expression.",
            vec![ParamSpec::optional(
                "filter_pattern",
                ParamType::String,
                "Regular expression applied to each process line.",
            )],
        )
    }

    async fn execute(&self, args: Map<String, Value>, _ctx: &ToolContext) -> anyhow::Result<String> {
        let filter = match str_arg(&args, "filter_pattern") {
            Some(raw) => Some(Regex::new(raw).with_context(|| format!("invalid filter '{}'", raw))?),
            None => None,
        };

        let output = capture("ps", &["aux"]).await?;
        if !output.status.success() {
            bail!(
                "ps aux failed: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(render_processes(&listing, filter.as_ref()))
    }
}

fn render_processes(listing: &str, filter: Option<&Regex>) -> String {
    let mut lines = listing.lines();
    let header = lines.next().unwrap_or_default();
    let rows: Vec<&str> = match filter {
        Some(re) => lines.filter(|line| re.is_match(line)).collect(),
        None => lines.collect(),
    };

    match filter {
        Some(re) if rows.is_empty() => {
            format!("No processes found matching pattern: '{}'", re.as_str())
        }
        Some(re) => format!(
            "Processes matching '{}' ({}):\n{}\n{}",
            re.as_str(),
            rows.len(),
            header,
            rows.join("\n")
        ),
        None => format!(
            "All running processes ({}):\n{}\n{}",
            rows.len(),
            header,
            rows.join("\n")
        ),
    }
}

pub struct GetSystemInfo;

/// Section title, program, and arguments for one get_system_info entry.
type InfoCommand = (&'static str, &'static str, &'static [&'static str]);

const COMMON_COMMANDS: &[InfoCommand] = &[
    ("OS", "uname", &["-a"]),
    ("Hostname", "hostname", &[]),
    ("Uptime", "uptime", &[]),
];

#[cfg(target_os = "linux")]
const PLATFORM_COMMANDS: &[InfoCommand] = &[
    ("CPU Info", "lscpu", &[]),
    ("Memory Info", "free", &["-h"]),
];

#[cfg(target_os = "macos")]
const PLATFORM_COMMANDS: &[InfoCommand] = &[
    ("CPU Info", "sysctl", &["-n", "machdep.cpu.brand_string"]),
    ("Memory Info (bytes)", "sysctl", &["-n", "hw.memsize"]),
];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const PLATFORM_COMMANDS: &[InfoCommand] = &[];

fn info_commands() -> impl Iterator<Item = &'static InfoCommand> {
    COMMON_COMMANDS.iter().chain(PLATFORM_COMMANDS)
}

async fn describe(program: &str, args: &[&str]) -> String {
    match capture(program, args).await {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            match (output.status.success(), stdout.is_empty()) {
                (true, false) => stdout,
                (false, false) => format!("{}\n(exit code {})", stdout, code),
                _ if !stderr.is_empty() => format!("Error (exit code {}): {}", code, stderr),
                _ => format!("Error (exit code {}): no output", code),
            }
        }
        Err(e) => format!("Failed to execute: {:#}", e),
    }
}

#[async_trait]
impl Tool for GetSystemInfo {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_system_info",
            "Report basic host information: OS, hostname, uptime, CPU, and memory.",
            Vec::new(),
        )
    }

    async fn execute(&self, _args: Map<String, Value>, _ctx: &ToolContext) -> anyhow::Result<String> {
        let commands: Vec<&InfoCommand> = info_commands().collect();
        let results = join_all(
            commands
                .iter()
                .map(|(_, program, args)| describe(program, args)),
        )
        .await;

        let mut out = String::from("System Information:\n");
        for ((section, _, _), result) in commands.iter().zip(results) {
            out.push_str(&format!("--- {} ---\n{}\n\n", section, result));
        }
        Ok(out.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PS_SAMPLE: &str = "\
USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND
root 1 0.0 0.1 1000 200 ? Ss 10:00 0:01 /sbin/init
op 4242 1.5 2.0 9000 800 pts/0 S+ 10:05 0:10 cargo build
op 4243 0.0 0.0 100 50 pts/1 S 10:06 0:00 vim notes.md";

    #[test]
    fn unfiltered_listing_keeps_every_row() {
        let out = render_processes(PS_SAMPLE, None);
        assert!(out.starts_with("All running processes (3):\nUSER PID"));
        assert!(out.contains("/sbin/init"));
    }

    #[test]
    fn filter_keeps_header_and_matching_rows() {
        let re = Regex::new("cargo|vim").unwrap();
        let out = render_processes(PS_SAMPLE, Some(&re));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Processes matching 'cargo|vim' (2):");
        assert!(lines[1].starts_with("USER PID"));
        assert!(lines[2].ends_with("cargo build"));
        assert!(lines[3].ends_with("vim notes.md"));
    }

    #[test]
    fn filter_without_matches_says_so() {
        let re = Regex::new("postgres").unwrap();
        assert_eq!(
            render_processes(PS_SAMPLE, Some(&re)),
            "No processes found matching pattern: 'postgres'"
        );
    }

    #[tokio::test]
    async fn invalid_filter_is_rejected_before_running_ps() {
        let err = ListProcesses
            .execute(
                json!({"filter_pattern": "("}).as_object().cloned().unwrap(),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid filter"));
    }

    #[tokio::test]
    async fn system_info_has_a_section_per_command() {
        let out = GetSystemInfo
            .execute(Map::new(), &ToolContext::default())
            .await
            .unwrap();
        assert!(out.starts_with("System Information:"));
        for (section, _, _) in info_commands() {
            assert!(out.contains(&format!("--- {} ---", section)), "{}", out);
        }
    }

    #[tokio::test]
    async fn missing_program_is_reported_not_fatal() {
        let text = describe("switchyard-no-such-program", &[]).await;
        assert!(text.starts_with("Failed to execute:"), "{}", text);
    }
}
