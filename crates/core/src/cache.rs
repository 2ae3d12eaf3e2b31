//! Cache backend trait — expiring key-value storage.
//!
//! The conversation store is the only caller. Values are opaque strings
//! (serialized conversations); the backend owns expiration.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;

/// Per-entry expiration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "ttl", rename_all = "snake_case")]
pub enum Expiration {
    /// Expires `ttl` after the last read or write of the entry.
    Sliding(Duration),
    /// Expires `ttl` after the entry was first written; rewrites keep the deadline.
    Absolute(Duration),
}

impl Expiration {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Sliding(ttl) | Self::Absolute(ttl) => *ttl,
        }
    }
}

impl Default for Expiration {
    fn default() -> Self {
        Self::Sliding(Duration::from_secs(60 * 60))
    }
}

/// The core CacheBackend trait.
///
/// Implementations: in-process map (for single-node deployments and tests);
/// a networked backend (Redis, memcached) implements the same contract.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// The backend name (e.g., "in_memory", "redis").
    fn name(&self) -> &str;

    /// Fetch a live entry. Expired and missing keys both yield `None`.
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError>;

    /// Write an entry with the given expiration policy.
    async fn set(
        &self,
        key: &str,
        value: String,
        expiration: Expiration,
    ) -> std::result::Result<(), CacheError>;
}
