use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::model::{MusicRecord, PlaylistRecord};
use crate::AppError;

pub const MUSIC_KEY: &str = "userMusic";
pub const PLAYLISTS_KEY: &str = "playlists";
pub const CURRENT_USER_KEY: &str = "currentUser";
const QUARANTINE_SUFFIX: &str = ".corrupt";

/// Key-value persistence area holding serialized text blobs.
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    /// Removes the entry, returning whether it existed.
    fn delete(&self, key: &str) -> anyhow::Result<bool>;
    fn save(&self) -> anyhow::Result<()>;
}

fn locked<T>(mutex: &Mutex<T>) -> anyhow::Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("local store lock poisoned"))
}

#[derive(Default)]
struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl KeyValueBackend for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data
            .lock()
            .map(|guard| guard.get(key).cloned())
            .unwrap_or_default()
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        locked(&self.data)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(locked(&self.data)?.remove(key).is_some())
    }

    fn save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// JSON object on disk, the same layout `tauri-plugin-store` writes, so the
/// CLI and the desktop shell can share a store file.
pub struct FileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("read local store {}", path.display()))?;
            if text.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str::<Map<String, Value>>(&text)
                    .with_context(|| format!("parse local store {}", path.display()))?
            }
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueBackend for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        let guard = self.data.lock().ok()?;
        match guard.get(key)? {
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        locked(&self.data)?.insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<bool> {
        Ok(locked(&self.data)?.remove(key).is_some())
    }

    fn save(&self) -> anyhow::Result<()> {
        let snapshot = {
            let guard = locked(&self.data)?;
            serde_json::to_vec_pretty(&*guard).context("serialize local store")?
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create store directory {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &snapshot).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| {
            format!("rename {} to {}", tmp.display(), self.path.display())
        })?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("local collection `{key}` is not valid structured data")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode local collection `{key}`")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("local store backend failed")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StoreError::Corrupt { .. })
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::Corrupt { key, source } => AppError::new("STORE/CORRUPT", message)
                .with_context("key", key)
                .with_cause(source),
            StoreError::Encode { key, source } => AppError::new("STORE/ENCODE", message)
                .with_context("key", key)
                .with_cause(source),
            StoreError::Backend(source) => AppError::new("STORE/BACKEND", message).with_cause(source),
        }
    }
}

/// Accessor for the local music and playlist collections.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<dyn KeyValueBackend>,
    writes: Arc<AsyncMutex<()>>,
}

impl LocalStore {
    pub fn new(backend: impl KeyValueBackend + 'static) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    pub fn from_shared(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            inner: backend,
            writes: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::default())
    }

    pub fn open_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Ok(Self::new(FileStore::open(path)?))
    }

    pub fn read_music_collection(&self) -> Result<Vec<MusicRecord>, StoreError> {
        self.read_collection(MUSIC_KEY)
    }

    pub fn read_playlist_collection(&self) -> Result<Vec<PlaylistRecord>, StoreError> {
        self.read_collection(PLAYLISTS_KEY)
    }

    pub fn write_music_collection(&self, records: &[MusicRecord]) -> Result<(), StoreError> {
        self.write_collection(MUSIC_KEY, records)
    }

    pub fn write_playlist_collection(&self, records: &[PlaylistRecord]) -> Result<(), StoreError> {
        self.write_collection(PLAYLISTS_KEY, records)
    }

    pub fn clear_music_collection(&self) -> Result<(), StoreError> {
        self.delete(MUSIC_KEY)?;
        self.persist()
    }

    pub fn clear_playlist_collection(&self) -> Result<(), StoreError> {
        self.delete(PLAYLISTS_KEY)?;
        self.persist()
    }

    /// Removes both collections and persists once. Keys listed in
    /// `quarantine` are moved aside to `<key>.corrupt` instead of dropped.
    pub fn clear_collections(&self, quarantine: &[&str]) -> Result<(), StoreError> {
        for key in [MUSIC_KEY, PLAYLISTS_KEY] {
            if quarantine.contains(&key) {
                self.move_aside(key)?;
            }
            self.delete(key)?;
        }
        self.persist()
    }

    /// Serializes read-modify-write cycles on the collections. Held by the
    /// catalog around local edits and by the migration engine from its read
    /// until cleanup.
    pub async fn write_lock(&self) -> OwnedMutexGuard<()> {
        self.writes.clone().lock_owned().await
    }

    fn move_aside(&self, key: &str) -> Result<(), StoreError> {
        let Some(raw) = self.inner.get(key) else {
            return Ok(());
        };
        let target = format!("{key}{QUARANTINE_SUFFIX}");
        self.set(&target, &raw)?;
        warn!(
            target: "cantoral",
            event = "local_collection_quarantined",
            key,
            moved_to = %target,
            bytes = raw.len()
        );
        Ok(())
    }

    /// Whether either collection entry exists, even if it holds an empty list.
    pub fn has_local_data(&self) -> bool {
        self.inner.get(MUSIC_KEY).is_some() || self.inner.get(PLAYLISTS_KEY).is_some()
    }

    pub fn read_raw(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    pub fn write_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(key, value)?;
        self.persist()
    }

    pub fn remove_raw(&self, key: &str) -> Result<(), StoreError> {
        if self.delete(key)? {
            self.persist()?;
        }
        Ok(())
    }

    fn read_collection<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        let Some(text) = self.inner.get(key) else {
            return Ok(Vec::new());
        };
        let records: Vec<T> =
            serde_json::from_str(&text).map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })?;
        debug!(
            target: "cantoral",
            event = "local_collection_read",
            key,
            count = records.len()
        );
        Ok(records)
    }

    fn write_collection<T: Serialize>(&self, key: &str, records: &[T]) -> Result<(), StoreError> {
        let text = serde_json::to_string(records).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &text)?;
        self.persist()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).map_err(StoreError::Backend)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key).map_err(StoreError::Backend)
    }

    fn persist(&self) -> Result<(), StoreError> {
        self.inner.save().map_err(StoreError::Backend)
    }
}
