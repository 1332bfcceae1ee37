//! Disk-backed TTL cache.
//!
//! One JSON file per key under a root directory, each carrying its own TTL.
//! An in-memory map mirrors what has been read or written this process; the
//! files are the durable copy and survive restarts. Corrupt files are removed
//! and read as misses.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::cache::entry::{CacheEntry, EntryHeader};
use crate::error::{PrwatchError, Result};
use crate::id::short_hash;

const ENTRY_EXTENSION: &str = "json";

/// Entry count and on-disk size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
}

/// Persistent key -> value store with per-entry expiration
pub struct PersistentCache<T> {
    root: PathBuf,
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for PersistentCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentCache").field("root", &self.root).finish_non_exhaustive()
    }
}

impl<T> PersistentCache<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open (or create) a cache rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entries: RwLock::new(HashMap::new()),
            _marker: PhantomData,
        })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_map(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_map(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// File holding `key`. Keys that are not filename-safe are hashed.
    fn entry_path(&self, key: &str) -> PathBuf {
        let safe = !key.is_empty()
            && key.len() <= 128
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let name = if safe { key.to_string() } else { short_hash(&[key]) };
        self.root.join(format!("{}.{}", name, ENTRY_EXTENSION))
    }

    fn load_file(&self, path: &Path) -> Result<Option<CacheEntry<T>>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PrwatchError::CacheIo(format!("{}: {}", path.display(), e))),
        };
        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|e| PrwatchError::CacheIo(format!("{}: {}", path.display(), e)))
    }

    fn remove_file(path: &Path) {
        if let Err(e) = fs::remove_file(path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }

    /// Look up `key`. Absent, expired and unreadable entries are misses.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Utc::now();
        {
            let map = self.read_map();
            if let Some(entry) = map.get(key) {
                if entry.is_expired_at(now) {
                    return None;
                }
                return Some(entry.data.clone());
            }
        }

        let path = self.entry_path(key);
        let mut map = self.write_map();
        // Another caller may have loaded or written it meanwhile.
        if let Some(entry) = map.get(key) {
            return (!entry.is_expired_at(now)).then(|| entry.data.clone());
        }

        match self.load_file(&path) {
            Ok(Some(entry)) => {
                if entry.is_expired_at(now) {
                    return None;
                }
                let data = entry.data.clone();
                map.insert(key.to_string(), entry);
                Some(data)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dropping unreadable cache entry");
                Self::remove_file(&path);
                None
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, value: T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(value, ttl);
        let path = self.entry_path(key);
        let tmp = path.with_extension("tmp");

        let mut map = self.write_map();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&serde_json::to_vec(&entry)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        map.insert(key.to_string(), entry);

        tracing::trace!(key = %key, ttl_secs = ttl.as_secs(), "Cache entry written");
        Ok(())
    }

    /// Drop one entry. Returns true if something was removed.
    pub fn remove(&self, key: &str) -> bool {
        let path = self.entry_path(key);
        let mut map = self.write_map();
        let in_memory = map.remove(key).is_some();
        let on_disk = path.exists();
        Self::remove_file(&path);
        in_memory || on_disk
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<usize> {
        let mut map = self.write_map();
        map.clear();
        let mut removed = 0;
        for path in self.entry_files()? {
            Self::remove_file(&path);
            removed += 1;
        }
        Ok(removed)
    }

    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.root.join(format!("*.{}", ENTRY_EXTENSION));
        let pattern = pattern
            .to_str()
            .ok_or_else(|| PrwatchError::CacheIo(format!("non UTF-8 cache root {}", self.root.display())))?;
        let paths = glob::glob(pattern).map_err(|e| PrwatchError::CacheIo(e.to_string()))?;
        Ok(paths.filter_map(|p| p.ok()).collect())
    }

    /// Sweep and remove every expired (or unreadable) entry.
    ///
    /// Returns the number of files removed; stops early with `Cancelled`.
    pub fn clean_expired_entries(&self, cancel: &CancellationToken) -> Result<usize> {
        let now = Utc::now();

        {
            let mut map = self.write_map();
            map.retain(|_, entry| !entry.is_expired_at(now));
        }

        let mut removed = 0;
        for path in self.entry_files()? {
            if cancel.is_cancelled() {
                return Err(PrwatchError::Cancelled);
            }

            let _map = self.write_map();
            let expired = match File::open(&path)
                .map_err(|e| e.to_string())
                .and_then(|f| serde_json::from_reader::<_, EntryHeader>(BufReader::new(f)).map_err(|e| e.to_string()))
            {
                Ok(header) => header.is_expired_at(now),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Removing unreadable cache file");
                    true
                }
            };
            if expired {
                Self::remove_file(&path);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Expired cache entries cleaned");
        }
        Ok(removed)
    }

    /// Number of stored entries and their total size on disk
    pub fn stats(&self) -> Result<CacheStats> {
        let _map = self.read_map();
        let mut stats = CacheStats::default();
        for path in self.entry_files()? {
            if let Ok(meta) = fs::metadata(&path) {
                stats.entry_count += 1;
                stats.total_bytes += meta.len();
            }
        }
        Ok(stats)
    }
}
