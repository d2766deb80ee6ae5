// ABOUTME: Session persistence for switchyard, keyed by (session id, agent name).
// ABOUTME: Defines the SessionStore trait plus atomic-file and in-memory implementations.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchyard_core::{Conversation, SessionKey, SessionState};
use thiserror::Error;

pub use file::FileSessionStore;
pub use memory::MemorySessionStore;

/// Errors that can occur while reading or writing session records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported record format version {found} (newest supported is {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("background task failed: {0}")]
    Task(String),
}

/// Everything persisted for one (session, agent) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub conversation: Conversation,
    pub state: SessionState,
}

impl SessionRecord {
    /// The record returned for a key that has never been saved.
    pub fn empty(key: &SessionKey) -> Self {
        Self {
            conversation: Conversation::new(),
            state: SessionState::new(key.session_id.as_deref()),
        }
    }
}

/// Persistence contract for conversations and session state.
///
/// `load` never fails for a missing key; it returns an empty record.
/// `save` atomically replaces the record for a key. Saves for the same key
/// are last-writer-wins; saves for different keys never block each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, StoreError>;

    async fn save(&self, key: &SessionKey, record: &SessionRecord) -> Result<(), StoreError>;

    /// Remove the record for a key. Returns whether anything was deleted.
    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError>;
}
