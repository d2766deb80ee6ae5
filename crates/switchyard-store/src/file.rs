// ABOUTME: JSON-file session store with atomic replace (write .tmp, fsync, rename).
// ABOUTME: Serializes writes per key with short-lived async locks; unreadable records are quarantined, not overwritten.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use switchyard_core::{Conversation, SessionKey, SessionState};
use ulid::Ulid;

use crate::{SessionRecord, SessionStore, StoreError};

const FORMAT_VERSION: u32 = 1;
const RECORD_SUFFIX: &str = ".json";

#[derive(Serialize)]
struct StoredSessionRef<'a> {
    format_version: u32,
    key: &'a SessionKey,
    conversation: &'a Conversation,
    state: &'a SessionState,
}

#[derive(Deserialize)]
struct StoredSession {
    format_version: u32,
    key: SessionKey,
    conversation: Conversation,
    state: SessionState,
}

/// Stores each (session, agent) record as one pretty-printed JSON file.
pub struct FileSessionStore {
    dir: PathBuf,
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileSessionStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record file for a key.
    pub fn record_path(&self, key: &SessionKey) -> PathBuf {
        self.dir
            .join(format!("{}{}", key.storage_stem(), RECORD_SUFFIX))
    }

    /// Keys of every readable record in the store directory.
    pub async fn list_keys(&self) -> Result<Vec<SessionKey>, StoreError> {
        let dir = self.dir.clone();
        run_blocking(move || list_keys_sync(&dir)).await
    }

    fn key_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Give back a lock from `key_lock`, dropping the map entry once no
    /// other writer holds or waits on it.
    fn release_key_lock(&self, key: &SessionKey, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(lock);
        if let Some(entry) = locks.get(key)
            && Arc::strong_count(entry) == 1
        {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, key: &SessionKey) -> Result<SessionRecord, StoreError> {
        let path = self.record_path(key);
        let owned_key = key.clone();
        run_blocking(move || load_sync(&path, &owned_key)).await
    }

    async fn save(&self, key: &SessionKey, record: &SessionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&StoredSessionRef {
            format_version: FORMAT_VERSION,
            key,
            conversation: &record.conversation,
            state: &record.state,
        })?;

        let dir = self.dir.clone();
        let stem = key.storage_stem();
        let lock = self.key_lock(key);
        let written = {
            let _guard = lock.lock().await;
            run_blocking(move || write_atomic(&dir, &stem, json.as_bytes())).await
        };
        self.release_key_lock(key, lock);
        written?;

        tracing::debug!(
            key = %key,
            messages = record.conversation.len(),
            "saved session record"
        );
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<bool, StoreError> {
        let path = self.record_path(key);
        let lock = self.key_lock(key);
        let removed = {
            let _guard = lock.lock().await;
            run_blocking(move || match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StoreError::Io(e)),
            })
            .await
        };
        self.release_key_lock(key, lock);
        removed
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Write `bytes` to `<dir>/<stem>.json` via a uniquely named temp file so an
/// interrupted write never leaves a half-written record in place.
fn write_atomic(dir: &Path, stem: &str, bytes: &[u8]) -> Result<(), StoreError> {
    fs::create_dir_all(dir)?;

    let tmp_path = dir.join(format!(".{}.{}.tmp", stem, Ulid::new()));
    let final_path = dir.join(format!("{}{}", stem, RECORD_SUFFIX));

    let written = (|| -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &final_path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(StoreError::Io(e));
    }

    // Make the rename itself durable. The record is already consistent, so
    // a failure here is only logged.
    if let Err(e) = sync_dir(dir) {
        tracing::debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

fn load_sync(path: &Path, key: &SessionKey) -> Result<SessionRecord, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(key = %key, "no persisted record, starting fresh");
            return Ok(SessionRecord::empty(key));
        }
        Err(e) => return Err(StoreError::Io(e)),
    };

    let stored: StoredSession = match serde_json::from_str(&contents) {
        Ok(stored) => stored,
        Err(e) => {
            quarantine(path, key, &e.to_string())?;
            return Ok(SessionRecord::empty(key));
        }
    };

    if stored.format_version > FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: stored.format_version,
            supported: FORMAT_VERSION,
        });
    }

    if let Err(e) = stored.conversation.validate() {
        quarantine(path, key, &e.to_string())?;
        return Ok(SessionRecord::empty(key));
    }

    if stored.key != *key {
        tracing::warn!(
            expected = %key,
            found = %stored.key,
            "session record key does not match its file name"
        );
    }

    tracing::debug!(
        key = %key,
        messages = stored.conversation.len(),
        "loaded session record"
    );
    Ok(SessionRecord {
        conversation: stored.conversation,
        state: stored.state,
    })
}

/// Move an unreadable record aside so the next save does not destroy it.
fn quarantine(path: &Path, key: &SessionKey, reason: &str) -> Result<(), StoreError> {
    let aside = path.with_extension(format!("corrupt-{}", Utc::now().format("%Y%m%d%H%M%S%3f")));
    tracing::warn!(
        key = %key,
        reason,
        moved_to = %aside.display(),
        "session record unreadable, starting fresh"
    );
    fs::rename(path, &aside)?;
    Ok(())
}

fn list_keys_sync(dir: &Path) -> Result<Vec<SessionKey>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut keys = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') || !name_str.ends_with(RECORD_SUFFIX) {
            continue;
        }
        let contents = fs::read_to_string(entry.path())?;
        match serde_json::from_str::<StoredSession>(&contents) {
            Ok(stored) => keys.push(stored.key),
            Err(e) => {
                tracing::warn!("skipping unreadable session record {}: {}", name_str, e);
            }
        }
    }
    keys.sort_by(|a, b| {
        (&a.agent_name, &a.session_id).cmp(&(&b.agent_name, &b.session_id))
    });
    Ok(keys)
}
