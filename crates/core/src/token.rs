//! Token counting contract.
//!
//! The budget planner only needs a cost per piece of text. The count must be
//! consistent with the engine's own tokenizer for budgets to be exact; the
//! heuristic counter here is the fallback when no tokenizer is configured.

/// Returns the token cost of a text.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Character-based heuristic: 1 token ≈ 4 characters, rounded up.
///
/// Accurate within ~10% for BPE tokenizers on English text.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}
