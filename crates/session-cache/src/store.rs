//! TTL-expiring key-value store.

use crate::error::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// How often the background task sweeps expired entries.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory key-value cache with per-key TTL.
///
/// Explicitly constructed and injected; no global state. Cloning is
/// cheap and shares the underlying map.
#[derive(Clone)]
pub struct SessionCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    default_ttl: Duration,
}

impl SessionCache {
    /// Create a new cache with the given default TTL.
    ///
    /// Spawns a background task to periodically sweep expired entries.
    pub fn new(default_ttl: Duration) -> Self {
        let cache = Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        };

        let cleanup = cache.clone();
        tokio::spawn(async move {
            cleanup.cleanup_loop().await;
        });

        cache
    }

    async fn cleanup_loop(&self) {
        loop {
            tokio::time::sleep(CLEANUP_INTERVAL).await;

            let now = Instant::now();
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.expires_at > now);

            let removed = before - entries.len();
            if removed > 0 {
                debug!("Swept {} expired cache entries", removed);
            }
        }
    }

    /// Store a value under a key, replacing any previous value and
    /// resetting the TTL. `ttl = None` uses the default TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let serialized = serde_json::to_string(value)?;
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);

        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: serialized,
                expires_at,
            },
        );
        Ok(())
    }

    /// Fetch a value by key. Expired or missing keys read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let entries = self.entries.read().await;
        let now = Instant::now();

        match entries.get(key).filter(|entry| entry.expires_at > now) {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.value)?)),
            None => Ok(None),
        }
    }

    /// Remove a key. Returns whether a live entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(key).is_some()
    }

    /// Number of unexpired entries.
    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        let now = Instant::now();
        entries.values().filter(|e| e.expires_at > now).count()
    }

    /// Whether the cache holds no unexpired entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
