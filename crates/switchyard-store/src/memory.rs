// ABOUTME: In-memory SessionStore for tests and ephemeral runs.
// ABOUTME: Records are cloned in and out so callers never share mutable state with the store.

use std::collections::HashMap;

use async_trait::async_trait;
use switchyard_core::SessionKey;
use tokio::sync::RwLock;

use crate::{SessionRecord, SessionStore, StoreError};

#[derive(Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<SessionKey, SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding a record.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Seed a record directly, bypassing `save`.
    pub async fn insert(&self, key: SessionKey, record: SessionRecord) {
        self.records.write().await.insert(key, record);
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| SessionRecord::empty(key)))
    }

    async fn save(&self, key: &SessionKey, record: &SessionRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(key).is_some())
    }
}
