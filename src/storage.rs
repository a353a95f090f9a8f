//! Persistence of local lookup tables
//!
//! [`LookupStore`] is the only mutable shared resource in a build. Callers
//! serialize read-modify-write cycles per geography with [`LocalTableLocks`].

use crate::error::{LookupError, Result};
use crate::model::LookupTable;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[async_trait]
pub trait LookupStore: Send + Sync {
    /// Current local table for `geography`, if one was ever saved
    async fn load_local(&self, geography: &str) -> Result<Option<LookupTable>>;

    async fn save_local(&self, geography: &str, table: &LookupTable) -> Result<()>;
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, LookupTable>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_table(self, geography: &str, table: LookupTable) -> Self {
        self.tables.write().await.insert(geography.to_string(), table);
        self
    }
}

#[async_trait]
impl LookupStore for InMemoryStore {
    async fn load_local(&self, geography: &str) -> Result<Option<LookupTable>> {
        Ok(self.tables.read().await.get(geography).cloned())
    }

    async fn save_local(&self, geography: &str, table: &LookupTable) -> Result<()> {
        self.tables
            .write()
            .await
            .insert(geography.to_string(), table.clone());
        Ok(())
    }
}

// =============================================================================
// JSON files
// =============================================================================

/// One pretty-printed JSON document per geography under `root`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, geography: &str) -> Result<PathBuf> {
        let valid = !geography.is_empty()
            && geography
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(LookupError::config(format!(
                "invalid geography name '{}'",
                geography
            )));
        }
        Ok(self.root.join(format!("{}.json", geography)))
    }
}

#[async_trait]
impl LookupStore for JsonFileStore {
    async fn load_local(&self, geography: &str) -> Result<Option<LookupTable>> {
        let path = self.path_for(geography)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LookupError::storage(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let table = serde_json::from_slice(&bytes).map_err(|e| {
            LookupError::storage(format!("parse {}: {}", path.display(), e))
        })?;
        Ok(Some(table))
    }

    async fn save_local(&self, geography: &str, table: &LookupTable) -> Result<()> {
        let path = self.path_for(geography)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let payload = serde_json::to_vec_pretty(table)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &payload).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(
            geography,
            path = %path.display(),
            records = table.len(),
            "Saved local table"
        );
        Ok(())
    }
}

// =============================================================================
// Advisory locks
// =============================================================================

/// Per-geography advisory locks for read-merge-write cycles
#[derive(Debug, Clone, Default)]
pub struct LocalTableLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl LocalTableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `geography`; released on drop
    pub async fn acquire(&self, geography: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(geography.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
