//! Error types for the ragchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator has its own error enum; they all fold into [`Error`].

use crate::message::ConversationId;
use thiserror::Error;

/// The top-level error type for every exchange operation.
///
/// Variants are deliberately distinguishable: callers decide whether to retry,
/// report, or degrade. Nothing in this workspace retries on its own.
#[derive(Debug, Error)]
pub enum Error {
    // --- Completion engine ---
    #[error("Completion engine failure: {0}")]
    CompletionEngine(#[from] ProviderError),

    #[error("Completion engine returned no content")]
    EmptyCompletion,

    // --- Conversation cache ---
    #[error("Conversation cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    // --- Retrieval ---
    #[error("Chunk retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    // --- Exchange lifecycle ---
    #[error("Exchange cancelled")]
    Cancelled,

    #[error("Conversation {0} already has an exchange in flight")]
    ConversationBusy(ConversationId),

    // --- Configuration ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Collaborator errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt entry for key {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Chunk source unavailable: {0}")]
    Unavailable(String),

    #[error("Query rejected: {0}")]
    InvalidQuery(String),
}
