//! Persisted node result cache
//!
//! Content-addressable cache of successful node results. Entries are keyed
//! by node identity digest and record the digests of everything the
//! computation consumed, so a restarted process validates reuse by digest
//! comparison instead of trusting staleness blindly.

use dashmap::DashMap;
use quarry_types::Digest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors that can occur while persisting or restoring the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize cache: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("failed to parse cache file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache io error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One persisted result: the serialized value plus the digests of all
/// inputs consumed when it was computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    /// Serialized JSON of the produced value.
    pub value_json: String,

    /// Digest of the produced value.
    pub output_digest: Digest,

    /// Digests of the node's inputs, in selector order.
    pub input_digests: Vec<Digest>,

    /// Files the computation read, with the content digests observed.
    pub file_reads: BTreeMap<PathBuf, Digest>,
}

impl PersistedEntry {
    /// Whether this entry is reusable for a computation that would consume
    /// the given input digests. File reads are validated separately, by
    /// re-digesting the recorded paths.
    pub fn matches_inputs(&self, input_digests: &[Digest]) -> bool {
        self.input_digests == input_digests
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Lookups that found a reusable entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries currently held.
    pub entries: usize,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Persisted cache: {} entries | Hits: {} | Misses: {} | Hit Rate: {:.1}%",
            self.entries,
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        )
    }
}

/// In-memory content-addressable cache with optional disk persistence.
#[derive(Debug, Default)]
pub struct ContentCache {
    entries: DashMap<Digest, PersistedEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContentCache {
    pub fn new() -> Self {
        ContentCache::default()
    }

    /// Load a cache file if it exists; otherwise start empty.
    pub fn load_or_empty(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Ok(ContentCache::new());
        }

        let bytes = std::fs::read(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let map: HashMap<String, PersistedEntry> =
            serde_json::from_slice(&bytes).map_err(|source| CacheError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let cache = ContentCache::new();
        for (hex, entry) in map {
            if let Some(digest) = Digest::from_hex(&hex) {
                cache.entries.insert(digest, entry);
            }
        }
        tracing::debug!(entries = cache.entries.len(), path = %path.display(), "persisted cache loaded");
        Ok(cache)
    }

    /// Look up an entry by node identity.
    pub fn get(&self, key: &Digest) -> Option<PersistedEntry> {
        match self.entries.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace the entry for a node identity.
    pub fn put(&self, key: Digest, entry: PersistedEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&self, key: &Digest) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Write the cache out as a single JSON file.
    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let map: HashMap<String, PersistedEntry> = self
            .entries
            .iter()
            .map(|e| (e.key().to_hex(), e.value().clone()))
            .collect();
        let bytes = serde_json::to_vec(&map).map_err(CacheError::Serialize)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, bytes).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(entries = map.len(), path = %path.display(), "persisted cache saved");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
