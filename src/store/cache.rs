//! Key-value caches with TTL: an in-process map and a file-per-key store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

use super::KeyValueCache;

/// Fetch and decode a JSON value. Undecodable entries are treated as absent.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn KeyValueCache, key: &str) -> Result<Option<T>> {
    match cache.get(key).await? {
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::debug!(key, error = %e, "cache entry not decodable; ignoring");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn KeyValueCache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<()> {
    let raw = serde_json::to_string(value).context("encoding cache value")?;
    cache.set(key, raw, ttl).await
}

// ------------------------------------------------------------
// In-memory cache
// ------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process cache. Expiry uses the tokio clock so paused-time tests can
/// advance past TTLs.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    inner: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            Some(e) if e.expires_at > Instant::now() => return Ok(Some(e.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            map.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.inner.lock().insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

// ------------------------------------------------------------
// File cache
// ------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    expires_at_ms: i64,
    value: String,
}

/// One JSON file per key under `dir`. Writes go to a temp file and are
/// renamed into place; expiry is stored inside the file (wall clock).
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating cache dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys may contain ':' or '/', so hash them into a safe file name.
        self.dir
            .join(format!("{:x}.json", md5::compute(key.as_bytes())))
    }
}

#[async_trait]
impl KeyValueCache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading cache file {}", path.display()))
            }
        };
        let entry: FileEntry = match serde_json::from_str(&raw) {
            Ok(e) => e,
            Err(_) => return Ok(None),
        };
        if entry.expires_at_ms <= Utc::now().timestamp_millis() {
            let _ = tokio::fs::remove_file(&path).await; // best-effort
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let path = self.path_for(key);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let entry = FileEntry {
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            value,
        };
        let json = serde_json::to_vec(&entry).context("encoding cache file")?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing cache file {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("renaming cache file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire() {
        let c = InMemoryCache::new();
        c.set("k", "v".into(), Duration::from_secs(10)).await.unwrap();
        assert_eq!(c.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(c.get("k").await.unwrap(), None);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn memory_last_write_wins() {
        let c = InMemoryCache::new();
        c.set("k", "a".into(), Duration::from_secs(60)).await.unwrap();
        c.set("k", "b".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(c.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn file_cache_roundtrip_and_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let c = FileCache::new(dir.path().join("cache")).unwrap();
        c.set("news:enrich:abc", "payload".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            c.get("news:enrich:abc").await.unwrap().as_deref(),
            Some("payload")
        );
        c.set("gone", "x".into(), Duration::ZERO).await.unwrap();
        assert_eq!(c.get("gone").await.unwrap(), None);
        assert_eq!(c.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_helpers_ignore_garbage() {
        let c = InMemoryCache::new();
        c.set("k", "not json".into(), Duration::from_secs(60)).await.unwrap();
        let v: Option<Vec<u32>> = get_json(&c, "k").await.unwrap();
        assert!(v.is_none());
        set_json(&c, "k", &vec![1u32, 2], Duration::from_secs(60)).await.unwrap();
        let v: Option<Vec<u32>> = get_json(&c, "k").await.unwrap();
        assert_eq!(v, Some(vec![1, 2]));
    }
}
