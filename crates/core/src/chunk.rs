//! Retrieved reference chunks and the retrieval trait that produces them.
//!
//! Ranking is entirely the source's concern. The chat pipeline only relies on
//! the order: most relevant first.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A unit of retrieved reference text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// The text content of this chunk.
    pub content: String,
    /// Position in the source's ranking (0 = most relevant).
    pub rank: usize,
    /// Human-readable source label (filename, URL, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, rank: usize) -> Self {
        Self {
            content: content.into(),
            rank,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Given a query, returns candidate chunks ordered most-relevant-first.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    /// The source name (e.g., "keyword", "pgvector").
    fn name(&self) -> &str;

    /// Retrieve at most `limit` chunks for `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Chunk>, RetrievalError>;
}
