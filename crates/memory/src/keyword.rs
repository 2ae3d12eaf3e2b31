//! Keyword chunk source — in-process retrieval for the CLI and tests.
//!
//! Scores documents by query-term occurrences normalized by length. This is a
//! stand-in for a vector index, not a ranking model.

use async_trait::async_trait;
use ragchat_core::chunk::{Chunk, ChunkSource};
use ragchat_core::error::RetrievalError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Document {
    content: String,
    lowercase: String,
    source: Option<String>,
}

/// Ranks stored documents against a query by keyword overlap.
#[derive(Clone, Default)]
pub struct KeywordChunkSource {
    documents: Arc<RwLock<Vec<Document>>>,
}

impl KeywordChunkSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one document.
    pub async fn add(&self, content: impl Into<String>, source: Option<String>) {
        let content = content.into();
        let lowercase = content.to_lowercase();
        self.documents.write().await.push(Document {
            content,
            lowercase,
            source,
        });
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

/// Distinct lowercase words of at least three characters.
fn query_terms(query: &str) -> BTreeSet<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl ChunkSource for KeywordChunkSource {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Chunk>, RetrievalError> {
        if query.trim().is_empty() {
            return Err(RetrievalError::InvalidQuery("empty query".into()));
        }

        let terms = query_terms(query);
        let documents = self.documents.read().await;

        let mut scored: Vec<(f32, &Document)> = documents
            .iter()
            .filter_map(|doc| {
                let occurrences: usize = terms
                    .iter()
                    .map(|term| doc.lowercase.matches(term.as_str()).count())
                    .sum();
                (occurrences > 0).then(|| {
                    let score = occurrences as f32 / (doc.content.len() as f32 / 100.0).max(1.0);
                    (score, doc)
                })
            })
            .collect();

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (_, doc))| Chunk {
                content: doc.content.clone(),
                rank,
                source: doc.source.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn source() -> KeywordChunkSource {
        let source = KeywordChunkSource::new();
        source
            .add("Rust is a systems programming language.", Some("rust.md".into()))
            .await;
        source.add("Python is great for scripting.", None).await;
        source
            .add("Rust ownership rules: each value has one owner. Rust borrows.", None)
            .await;
        source
    }

    #[tokio::test]
    async fn ranks_by_term_frequency() {
        let source = source().await;
        let chunks = source.search("Tell me about Rust", 10).await.unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].content.contains("ownership"));
        assert_eq!(chunks[0].rank, 0);
        assert_eq!(chunks[1].rank, 1);
        assert_eq!(chunks[1].source.as_deref(), Some("rust.md"));
    }

    #[tokio::test]
    async fn respects_limit() {
        let source = source().await;
        let chunks = source.search("rust python", 1).await.unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn no_match_is_empty() {
        let source = source().await;
        assert!(source.search("haskell monads", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let source = source().await;
        assert!(matches!(
            source.search("   ", 5).await,
            Err(RetrievalError::InvalidQuery(_))
        ));
    }
}
