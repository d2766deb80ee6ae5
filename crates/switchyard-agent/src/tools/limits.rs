// ABOUTME: get_configured_token_limits: reports the configured hard token limit and warning threshold.
// ABOUTME: Reads configuration only; live usage is enforced by the run loop, not exposed here.

use async_trait::async_trait;
use serde_json::{Map, Value};
use switchyard_core::ToolSchema;

use super::{Tool, ToolContext};

pub struct GetConfiguredTokenLimits {
    max_tokens: u64,
    warn_tokens: u64,
}

impl GetConfiguredTokenLimits {
    pub fn new(max_tokens: u64, warn_tokens: u64) -> Self {
        Self {
            max_tokens,
            warn_tokens,
        }
    }

    fn summary(&self) -> String {
        let limit_status = if self.max_tokens > 0 {
            format!("Enabled (Max: {})", group_thousands(self.max_tokens))
        } else {
            "Disabled".to_string()
        };

        let warn_status = match (self.max_tokens, self.warn_tokens) {
            (0, _) => "Disabled".to_string(),
            (_, 0) => "Disabled (threshold set to 0)".to_string(),
            (max, warn) if warn >= max => format!(
                "Enabled (Threshold: {}) [Threshold is at or above the limit, the warning may never fire]",
                group_thousands(warn)
            ),
            (_, warn) => format!("Enabled (Threshold: {})", group_thousands(warn)),
        };

        format!(
            "Configured Token Limits:\n- Global Token Limit Status: {}\n- Warning Threshold Status: {}",
            limit_status, warn_status
        )
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[async_trait]
impl Tool for GetConfiguredTokenLimits {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "get_configured_token_limits",
            "Report the configured per-session token limit and warning threshold (not current usage).",
            Vec::new(),
        )
    }

    async fn execute(&self, _args: Map<String, Value>, ctx: &ToolContext) -> anyhow::Result<String> {
        tracing::debug!(
            agent = %ctx.agent_name,
            max = self.max_tokens,
            warn = self.warn_tokens,
            "reporting configured token limits"
        );
        Ok(self.summary())
    }
}
