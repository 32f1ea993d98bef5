//! JSON-file snapshot store.
//!
//! One file per CRDT id under a root directory. Saves write to a temporary
//! sibling and rename over the target, which is atomic per key on POSIX
//! filesystems. Ids are discovered by scanning the directory, so a store
//! can be reopened over an existing tree.

use crate::{StateStore, StoreError, StoreResult, StoreStats};
use async_trait::async_trait;
use concord_core::Crdt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

const SNAPSHOT_EXT: &str = "json";

/// Snapshot store writing one JSON file per CRDT.
#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    closed: AtomicBool,
}

impl JsonFileStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub async fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(JsonFileStore {
            root,
            closed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    /// Ids double as file names, so path metacharacters are rejected.
    fn path_for(&self, id: &str) -> StoreResult<PathBuf> {
        if id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\', '\0'])
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(format!("{}.{}", id, SNAPSHOT_EXT)))
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save(&self, crdt: &Crdt) -> StoreResult<()> {
        self.ensure_open()?;
        let path = self.path_for(crdt.id())?;
        let encoded = serde_json::to_vec_pretty(&crdt.snapshot()?)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Value>> {
        self.ensure_open()?;
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, id: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let path = self.path_for(id)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn list_ids(&self) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> StoreResult<()> {
        let ids = self.list_ids().await?;
        for id in ids {
            self.remove(&id).await?;
        }
        Ok(())
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.ensure_open()?;
        let mut total = 0usize;
        let mut size = 0u64;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXT) {
                total += 1;
                size += entry.metadata().await?.len();
            }
        }
        Ok(StoreStats {
            total_crdts: total,
            size_in_bytes: Some(size),
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
