//! Conversation storage and in-process collaborators for ragchat.
//!
//! - [`ConversationStore`] — bounded, expiring, lock-guarded history per conversation
//! - [`InMemoryCache`] — expiring cache backend for single-node use and tests
//! - [`KeywordChunkSource`] — keyword-ranked chunk retrieval over in-memory documents

pub mod in_memory;
pub mod keyword;
pub mod store;

pub use in_memory::InMemoryCache;
pub use keyword::KeywordChunkSource;
pub use store::{ConversationLock, ConversationStore};
