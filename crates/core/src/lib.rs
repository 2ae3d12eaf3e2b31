//! # ragchat Core
//!
//! Domain types, collaborator traits, and error definitions for the ragchat
//! retrieval-augmented conversation engine. This crate has **no framework
//! dependencies**: it defines the model every other crate implements against.
//!
//! ## Collaborators
//!
//! Everything the engine talks to but does not own is a trait here:
//! - [`CompletionEngine`] — the language model (batch + streaming)
//! - [`TokenCounter`] — token cost of a piece of text
//! - [`ChunkSource`] — retrieval of candidate reference chunks
//! - [`CacheBackend`] — expiring key-value storage behind the conversation store

pub mod cache;
pub mod chunk;
pub mod error;
pub mod message;
pub mod provider;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use cache::{CacheBackend, Expiration};
pub use chunk::{Chunk, ChunkSource};
pub use error::{CacheError, Error, ProviderError, Result, RetrievalError};
pub use message::{Conversation, ConversationId, Message, Role};
pub use provider::{Completion, CompletionEngine, CompletionRequest, StreamFragment, TokenUsage};
pub use token::{HeuristicTokenCounter, TokenCounter};
