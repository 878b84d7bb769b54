/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Extension storage: a flat, string-keyed key-value store.
//!
//! Every registry in the crate persists through [`StorageBackend`]. Values
//! are JSON documents; the store imposes no schema beyond what callers
//! encode. Two implementations ship here: [`MemoryStore`] for tests and
//! [`JsonFileStore`], which keeps the whole keyspace in a single pretty
//! JSON document under the user's config directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

#[derive(Debug)]
pub enum StoreError {
    Io(String),
    Data(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Data(e) => write!(f, "Data error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Async key-value storage contract.
///
/// `get` returns `None` for absent keys and never treats absence as an
/// error. Mutations must be durable before the returned future resolves;
/// callers await completion before treating state as committed.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read a JSON document stored under `key`, or `None` when absent.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn StorageBackend,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw)
        .map_err(|e| StoreError::Data(format!("stored value under '{key}' is corrupt: {e}")))?;
    Ok(Some(value))
}

/// Serialize `value` as JSON and persist it under `key`.
pub async fn set_json<T: Serialize>(
    store: &dyn StorageBackend,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| StoreError::Data(format!("serializing value for '{key}' failed: {e}")))?;
    store.set(key, &raw).await
}

/// In-memory store. Used by tests and by callers that opt out of
/// persistence entirely.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

const STORE_FILE_NAME: &str = "store.json";

/// File-backed store: the whole keyspace lives in one JSON object on
/// disk, rewritten on every mutation. Wallet state is small enough that
/// rewriting the document is cheaper than managing per-key files.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles against the backing file.
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `base_dir`.
    pub fn open(base_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_dir)
            .map_err(|e| StoreError::Io(format!("failed to create store dir: {e}")))?;
        let path = base_dir.join(STORE_FILE_NAME);
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Io(format!("failed to read store file: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| StoreError::Data(format!("store file is corrupt: {e}")))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn write_out(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Data(format!("store serialization failed: {e}")))?;
        std::fs::write(&self.path, content)
            .map_err(|e| StoreError::Io(format!("failed to write store file: {e}")))
    }
}

#[async_trait]
impl StorageBackend for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), value.to_string());
        self.write_out(&entries)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if entries.remove(key).is_some() {
            self.write_out(&entries)?;
        }
        Ok(())
    }
}
