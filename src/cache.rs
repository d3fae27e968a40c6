//! On-disk media cache keyed by story id or company external id.
//!
//! One directory, one file per key, raw bytes. Writes land in a randomized
//! temp file that is renamed over the destination, so a reader never sees a
//! partially written blob. A small LRU tier in memory sits in front of the
//! directory for blobs the carousel touches repeatedly.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No cached entry for key '{0}'")]
    NotFound(String),

    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key would escape the cache directory or collide with temp files.
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),
}

/// Distinguishes temp files of writes started within the same clock tick.
static PUT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Prefix reserved for in-flight writes; never a valid key.
const TEMP_PREFIX: char = '.';

pub struct ContentCache {
    dir: PathBuf,
    memory: Mutex<LruCache<String, Arc<Vec<u8>>>>,
}

impl ContentCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    ///
    /// `memory_entries` of 0 is bumped to 1.
    pub async fn open(dir: impl Into<PathBuf>, memory_entries: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let capacity = NonZeroUsize::new(memory_entries).unwrap_or(NonZeroUsize::MIN);
        tracing::debug!(dir = %dir.display(), memory_entries = capacity.get(), "Opened content cache");
        Ok(Self {
            dir,
            memory: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    pub async fn has(&self, key: &str) -> bool {
        let Ok(path) = self.path_for(key) else {
            return false;
        };
        if self.remember(key).is_some() {
            return true;
        }
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Store `bytes` under `key`, replacing any previous blob.
    ///
    /// Concurrent writers of one key race; whichever rename lands last wins.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(key)?;

        // Unpredictable temp name opened with create_new, so a planted symlink is never followed.
        let random_suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let sequence = PUT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_path = self.dir.join(format!(
            "{TEMP_PREFIX}{key}.tmp.{random_suffix:016x}.{sequence}"
        ));

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .await?;

        let written = async {
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(CacheError::Io(e));
        }

        if let Ok(mut memory) = self.memory.lock() {
            memory.put(key.to_string(), Arc::new(bytes.to_vec()));
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path_for(key)?;
        if let Some(hit) = self.remember(key) {
            return Ok(hit.as_ref().clone());
        }

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                if let Ok(mut memory) = self.memory.lock() {
                    memory.put(key.to_string(), Arc::new(bytes.clone()));
                }
                Ok(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CacheError::NotFound(key.to_string()))
            }
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// Every key currently stored on disk. Temp files are skipped.
    pub async fn list_keys(&self) -> HashSet<String> {
        let mut keys = HashSet::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list cache directory");
                return keys;
            }
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
                    if !is_file {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        if validate_key(name).is_ok() {
                            keys.insert(name.to_string());
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Error while reading cache directory entry");
                    break;
                }
            }
        }
        keys
    }

    /// Remove `key` from both tiers. Missing keys are not an error.
    pub async fn evict(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        if let Ok(mut memory) = self.memory.lock() {
            memory.pop(key);
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    /// `put` for callers that cannot do anything useful with a failure.
    pub async fn store_best_effort(&self, key: &str, bytes: &[u8]) {
        if let Err(e) = self.put(key, bytes).await {
            tracing::warn!(key = %key, error = %e, "Failed to cache content");
        }
    }

    fn remember(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.memory.lock().ok()?.get(key).cloned()
    }
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    let invalid = key.is_empty()
        || key.starts_with(TEMP_PREFIX)
        || key.contains("..")
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if invalid {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_cache(entries: usize) -> (tempfile::TempDir, ContentCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ContentCache::open(dir.path().join("media"), entries)
            .await
            .unwrap();
        (dir, cache)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_dir, cache) = test_cache(4).await;
        cache.put("story-1", b"jpeg bytes").await.unwrap();

        assert!(cache.has("story-1").await);
        assert_eq!(cache.get("story-1").await.unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, cache) = test_cache(4).await;
        let err = cache.get("nope").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound(k) if k == "nope"));
        assert!(!cache.has("nope").await);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, cache) = test_cache(4).await;
        cache.put("k", b"first").await.unwrap();
        cache.put("k", b"second").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_concurrent_puts_of_one_key_both_land() {
        let (_dir, cache) = test_cache(4).await;
        let (first, second) = tokio::join!(cache.put("a", b"one"), cache.put("a", b"two"));
        first.unwrap();
        second.unwrap();

        let stored = cache.get("a").await.unwrap();
        assert!(stored == b"one" || stored == b"two");
        assert_eq!(cache.list_keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let (_dir, cache) = test_cache(4).await;
        for key in ["", "..", "../escape", "a/b", "a\\b", ".hidden"] {
            let err = cache.put(key, b"x").await.unwrap_err();
            assert!(matches!(err, CacheError::InvalidKey(_)), "key {key:?}");
            assert!(!cache.has(key).await);
        }
    }

    #[tokio::test]
    async fn test_disk_survives_memory_eviction() {
        let (_dir, cache) = test_cache(1).await;
        cache.put("a", b"alpha").await.unwrap();
        cache.put("b", b"beta").await.unwrap();

        // "a" fell out of the single-slot memory tier
        assert_eq!(cache.get("a").await.unwrap(), b"alpha");
        assert_eq!(cache.get("b").await.unwrap(), b"beta");
    }

    #[tokio::test]
    async fn test_list_keys_skips_temp_files() {
        let (_dir, cache) = test_cache(4).await;
        cache.put("s1", b"1").await.unwrap();
        cache.put("ext-9", b"logo").await.unwrap();
        std::fs::write(cache.dir().join(".s2.tmp.0000"), b"partial").unwrap();

        let keys = cache.list_keys().await;
        assert_eq!(keys, HashSet::from(["s1".to_string(), "ext-9".to_string()]));
    }

    #[tokio::test]
    async fn test_evict_removes_both_tiers() {
        let (_dir, cache) = test_cache(4).await;
        cache.put("s1", b"1").await.unwrap();
        cache.evict("s1").await.unwrap();

        assert!(!cache.has("s1").await);
        assert!(matches!(cache.get("s1").await, Err(CacheError::NotFound(_))));
        // Evicting twice is fine
        cache.evict("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_store_best_effort_swallows_errors() {
        let (_dir, cache) = test_cache(4).await;
        cache.store_best_effort("../bad", b"x").await;
        cache.store_best_effort("good", b"x").await;
        assert!(cache.has("good").await);
    }

    #[tokio::test]
    async fn test_reopen_sees_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = ContentCache::open(dir.path(), 2).await.unwrap();
            cache.put("persisted", b"data").await.unwrap();
        }
        let cache = ContentCache::open(dir.path(), 2).await.unwrap();
        assert_eq!(cache.get("persisted").await.unwrap(), b"data");
    }
}
