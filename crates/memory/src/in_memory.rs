//! In-memory cache backend — single-node deployments and tests.
//!
//! Expiration is tracked with `tokio::time::Instant`, so tests can drive it
//! with a paused clock.

use async_trait::async_trait;
use ragchat_core::cache::{CacheBackend, Expiration};
use ragchat_core::error::CacheError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

struct CacheEntry {
    value: String,
    expiration: Expiration,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// An in-process expiring key-value map.
///
/// Expired entries are dropped lazily on access, or eagerly via
/// [`InMemoryCache::purge_expired`].
#[derive(Clone)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Remove every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InMemoryCache {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        // Write lock: a hit on a sliding entry moves its deadline.
        let mut entries = self.entries.write().await;

        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };

        if entry.is_expired(now) {
            entries.remove(key);
            trace!(key, "Cache entry expired");
            return Ok(None);
        }

        if let Expiration::Sliding(ttl) = entry.expiration {
            entry.expires_at = now + ttl;
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, expiration: Expiration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        let expires_at = match expiration {
            Expiration::Sliding(ttl) => now + ttl,
            Expiration::Absolute(ttl) => match entries.get(key) {
                Some(existing) if !existing.is_expired(now) => existing.expires_at,
                _ => now + ttl,
            },
        };

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expiration,
                expires_at,
            },
        );
        Ok(())
    }
}
