//! File-backed layer store
//!
//! Each entry lives at `<root>/<key>/` holding `entry.json` plus the
//! layer payload under `layer/`. Entries are never mutated in place: a
//! changed input produces a new key, never an overwrite. Writers stage
//! into a unique temp directory and rename into place; when two builders
//! race on the same key the first rename wins and the loser's staged
//! copy is discarded (recomputation yields an equivalent layer, so
//! losing the race is safe).

use crate::cache::key::CacheKey;
use crate::error::{KilnError, KilnResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Metadata for one cached layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub stage: String,
    pub step: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(key: CacheKey, stage: &str, step: &str) -> Self {
        Self {
            key,
            stage: stage.to_string(),
            step: step.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Content-addressed layer cache shared by all stages of a pipeline run
pub struct LayerCache {
    root: PathBuf,
    index: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl LayerCache {
    /// Open (or create) a cache rooted at `root`, loading existing entries
    pub async fn open(root: &Path) -> KilnResult<Self> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| KilnError::io(format!("creating cache directory {}", root.display()), e))?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| KilnError::io("reading cache directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KilnError::io("reading cache entry", e))?
        {
            let meta_path = entry.path().join("entry.json");
            if !meta_path.exists() {
                continue;
            }
            // Unreadable entries are skipped, not fatal: the key will
            // simply miss and be recomputed.
            if let Ok(content) = tokio::fs::read_to_string(&meta_path).await {
                if let Ok(cached) = serde_json::from_str::<CacheEntry>(&content) {
                    index.insert(cached.key.clone(), cached);
                }
            }
        }

        debug!("Opened layer cache with {} entries", index.len());
        Ok(Self {
            root: root.to_path_buf(),
            index: Mutex::new(index),
        })
    }

    /// Look up a layer by key
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.index
            .lock()
            .expect("cache index poisoned")
            .get(key)
            .cloned()
    }

    /// Path to a cached layer's payload directory
    pub fn layer_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str()).join("layer")
    }

    /// Allocate a staging directory on the cache's filesystem.
    ///
    /// Layer payloads must be staged here before `put` so the final
    /// publish is a rename, never a copy.
    pub async fn new_staging_dir(&self) -> KilnResult<PathBuf> {
        let dir = self.root.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| KilnError::io("creating cache staging directory", e))?;
        Ok(dir)
    }

    /// Insert a layer whose payload has been staged at `staged`.
    ///
    /// The staged directory is moved under the cache root. First-writer-wins:
    /// if another builder already published this key the staged copy is
    /// discarded and the existing entry returned.
    pub async fn put(
        &self,
        key: CacheKey,
        stage: &str,
        step: &str,
        staged: &Path,
    ) -> KilnResult<CacheEntry> {
        if let Some(existing) = self.get(&key) {
            let _ = tokio::fs::remove_dir_all(staged).await;
            return Ok(existing);
        }

        let tmp = self.root.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&tmp)
            .await
            .map_err(|e| KilnError::io("creating cache staging directory", e))?;

        let entry = CacheEntry::new(key.clone(), stage, step);
        let meta = serde_json::to_string_pretty(&entry)?;
        tokio::fs::write(tmp.join("entry.json"), meta)
            .await
            .map_err(|e| KilnError::io("writing cache entry metadata", e))?;
        tokio::fs::rename(staged, tmp.join("layer"))
            .await
            .map_err(|e| KilnError::io("staging cache layer", e))?;

        let target = self.root.join(key.as_str());
        match tokio::fs::rename(&tmp, &target).await {
            Ok(()) => {}
            Err(_) if target.exists() => {
                // Lost the race; the published entry is equivalent.
                let _ = tokio::fs::remove_dir_all(&tmp).await;
            }
            Err(e) => return Err(KilnError::io("publishing cache entry", e)),
        }

        let mut index = self.index.lock().expect("cache index poisoned");
        let entry = index.entry(key).or_insert(entry).clone();
        debug!("Cached layer {} ({}/{})", entry.key.short(), stage, step);
        Ok(entry)
    }

    /// All entries, newest first
    pub fn list(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<_> = self
            .index
            .lock()
            .expect("cache index poisoned")
            .values()
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Remove every entry. Returns the number removed.
    pub async fn clear(&self) -> KilnResult<usize> {
        let keys: Vec<CacheKey> = {
            let mut index = self.index.lock().expect("cache index poisoned");
            index.drain().map(|(k, _)| k).collect()
        };

        for key in &keys {
            tokio::fs::remove_dir_all(self.root.join(key.as_str()))
                .await
                .map_err(|e| KilnError::io("removing cache entry", e))?;
        }
        Ok(keys.len())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
