//! Conversation store — bounded, expiring, per-conversation history.
//!
//! Every write goes through a per-conversation lock, so a read-append-write
//! commit can never interleave with another commit on the same id. Locks for
//! different ids are independent.
//!
//! The lock is also exposed directly ([`ConversationStore::lock`]) so a caller
//! can hold one conversation for a whole exchange: load history, call the
//! engine, and commit, without another exchange slipping in between.

use parking_lot::Mutex;
use ragchat_core::cache::{CacheBackend, Expiration};
use ragchat_core::error::{CacheError, Error, Result};
use ragchat_core::message::{Conversation, ConversationId, Message};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::in_memory::InMemoryCache;

const KEY_PREFIX: &str = "conversation:";

/// Shared handle to the conversation history of every session.
///
/// Cheap to clone; clones share the backend and the lock table.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn CacheBackend>,
    max_messages: usize,
    expiration: Expiration,
    locks: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

impl ConversationStore {
    /// Create a store over `backend`, keeping at most `max_messages` per conversation.
    pub fn new(backend: Arc<dyn CacheBackend>, max_messages: usize, expiration: Expiration) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                max_messages,
                expiration,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A store backed by a fresh [`InMemoryCache`].
    pub fn in_memory(max_messages: usize, expiration: Expiration) -> Self {
        Self::new(Arc::new(InMemoryCache::new()), max_messages, expiration)
    }

    pub fn max_messages(&self) -> usize {
        self.inner.max_messages
    }

    pub fn expiration(&self) -> Expiration {
        self.inner.expiration
    }

    /// Ordered history of a conversation. Unknown or expired ids yield an empty list.
    pub async fn get(&self, id: &ConversationId) -> Result<Vec<Message>> {
        Ok(self
            .load(id)
            .await?
            .map(|conversation| conversation.messages)
            .unwrap_or_default())
    }

    /// Append `messages` to a conversation and truncate it, as one atomic step.
    pub async fn append_exchange(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        let lock = self.lock(id).await;
        lock.append_exchange(messages).await
    }

    /// Acquire exclusive access to a conversation, waiting behind any holder.
    pub async fn lock(&self, id: &ConversationId) -> ConversationLock {
        let mut wait = LockWait {
            store: self,
            id,
            abandoned: true,
        };
        let guard = self.lock_handle(id).lock_owned().await;
        wait.abandoned = false;
        trace!(conversation_id = %id, "Conversation locked");
        ConversationLock {
            store: self.clone(),
            id: id.clone(),
            guard: Some(guard),
        }
    }

    /// Acquire exclusive access, failing with [`Error::ConversationBusy`] if held.
    pub fn try_lock(&self, id: &ConversationId) -> Result<ConversationLock> {
        let handle = self.lock_handle(id);
        let guard = handle
            .try_lock_owned()
            .map_err(|_| Error::ConversationBusy(id.clone()))?;
        Ok(ConversationLock {
            store: self.clone(),
            id: id.clone(),
            guard: Some(guard),
        })
    }

    /// Number of conversations with a live lock entry (held or awaited).
    pub fn active_locks(&self) -> usize {
        self.inner.locks.lock().len()
    }

    fn lock_handle(&self, id: &ConversationId) -> Arc<AsyncMutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the lock entry for `id` once nobody holds or awaits it.
    fn prune(&self, id: &ConversationId) {
        let mut locks = self.inner.locks.lock();
        if locks.get(id).is_some_and(|handle| Arc::strong_count(handle) == 1) {
            locks.remove(id);
        }
    }

    async fn load(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let key = cache_key(id);
        let Some(payload) = self.inner.backend.get(&key).await? else {
            return Ok(None);
        };
        let conversation = serde_json::from_str(&payload).map_err(|e| CacheError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(Some(conversation))
    }

    /// Read-append-truncate-write. Callers must hold the conversation lock.
    async fn commit(&self, id: &ConversationId, messages: Vec<Message>) -> Result<()> {
        let mut conversation = self
            .load(id)
            .await?
            .unwrap_or_else(|| Conversation::new(id.clone()));

        let appended = messages.len();
        conversation.extend(messages);
        let dropped = conversation.truncate_oldest(self.inner.max_messages);

        let payload = serde_json::to_string(&conversation)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.inner
            .backend
            .set(&cache_key(id), payload, self.inner.expiration)
            .await?;

        debug!(
            conversation_id = %id,
            appended,
            dropped,
            total = conversation.len(),
            "Exchange committed"
        );
        Ok(())
    }
}

fn cache_key(id: &ConversationId) -> String {
    format!("{KEY_PREFIX}{id}")
}

/// Prunes the lock entry when a [`ConversationStore::lock`] call is dropped
/// before it acquires.
struct LockWait<'a> {
    store: &'a ConversationStore,
    id: &'a ConversationId,
    abandoned: bool,
}

impl Drop for LockWait<'_> {
    fn drop(&mut self) {
        if self.abandoned {
            self.store.prune(self.id);
        }
    }
}

/// Exclusive access to one conversation. Released on drop.
pub struct ConversationLock {
    store: ConversationStore,
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ConversationLock {
    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Current history of the locked conversation.
    pub async fn history(&self) -> Result<Vec<Message>> {
        self.store.get(&self.id).await
    }

    /// Append and truncate under the lock already held.
    pub async fn append_exchange(&self, messages: Vec<Message>) -> Result<()> {
        self.store.commit(&self.id, messages).await
    }
}

impl Drop for ConversationLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.prune(&self.id);
        trace!(conversation_id = %self.id, "Conversation released");
    }
}

impl std::fmt::Debug for ConversationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationLock").field("id", &self.id).finish()
    }
}
