// ABOUTME: Session identity and per-session agent state (working directory, token counters).
// ABOUTME: SessionKey names one persisted record; an absent session id maps to a shared default key.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by a language-model backend for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Identifies one persisted (session, agent) record.
///
/// All callers that omit a session id share one record per agent name.
/// That sharing is intentional: session-less invocations of the same
/// agent continue the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: Option<String>,
    pub agent_name: String,
}

impl SessionKey {
    pub fn new(session_id: Option<&str>, agent_name: impl Into<String>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            agent_name: agent_name.into(),
        }
    }

    /// The shared key used when no session id is given.
    pub fn shared(agent_name: impl Into<String>) -> Self {
        Self::new(None, agent_name)
    }

    pub fn is_shared(&self) -> bool {
        self.session_id.is_none()
    }

    /// A filesystem-safe, collision-free stem for this key.
    ///
    /// Bytes outside `[A-Za-z0-9-]` are percent-encoded so that distinct
    /// keys never map to the same stem.
    pub fn storage_stem(&self) -> String {
        let agent = encode_component(&self.agent_name);
        match &self.session_id {
            Some(id) => format!("session_{}__{}", encode_component(id), agent),
            None => format!("shared__{}", agent),
        }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.session_id {
            Some(id) => write!(f, "{}@{}", self.agent_name, id),
            None => write!(f, "{}@<shared>", self.agent_name),
        }
    }
}

fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Auxiliary state persisted alongside a conversation.
///
/// Token counters only grow while an instance is loaded; they reset only
/// when the persisted record is deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(session_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }

    /// Fold one exchange's usage into the cumulative counters.
    pub fn record_usage(&mut self, usage: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(usage.completion_tokens);
    }

    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_and_session_keys_have_distinct_stems() {
        let shared = SessionKey::shared("CodingAgent");
        let scoped = SessionKey::new(Some("abc"), "CodingAgent");
        assert!(shared.is_shared());
        assert_eq!(shared.storage_stem(), "shared__CodingAgent");
        assert_eq!(scoped.storage_stem(), "session_abc__CodingAgent");
    }

    #[test]
    fn storage_stem_never_collides_on_sanitized_input() {
        let slash = SessionKey::new(Some("a/b"), "Agent");
        let underscore = SessionKey::new(Some("a_b"), "Agent");
        assert_ne!(slash.storage_stem(), underscore.storage_stem());
        assert!(!slash.storage_stem().contains('/'));
    }

    #[test]
    fn storage_stem_escapes_separator_lookalikes() {
        let a = SessionKey::new(Some("x__y"), "z");
        let b = SessionKey::new(Some("x"), "y__z");
        assert_ne!(a.storage_stem(), b.storage_stem());
    }

    #[test]
    fn record_usage_is_monotonic_and_saturating() {
        let mut state = SessionState::new(Some("s1"));
        state.record_usage(TokenUsage::new(10, 5));
        state.record_usage(TokenUsage::new(3, 2));
        assert_eq!(state.prompt_tokens, 13);
        assert_eq!(state.completion_tokens, 7);
        assert_eq!(state.total_tokens(), 20);

        state.prompt_tokens = u64::MAX - 1;
        state.record_usage(TokenUsage::new(10, 0));
        assert_eq!(state.prompt_tokens, u64::MAX);
    }

    #[test]
    fn missing_optional_fields_deserialize_to_defaults() {
        let state: SessionState = serde_json::from_str(r#"{"session_id": null}"#).unwrap();
        assert_eq!(state, SessionState::default());
    }

    #[test]
    fn display_marks_shared_sessions() {
        assert_eq!(SessionKey::shared("A").to_string(), "A@<shared>");
        assert_eq!(SessionKey::new(Some("s"), "A").to_string(), "A@s");
    }
}
