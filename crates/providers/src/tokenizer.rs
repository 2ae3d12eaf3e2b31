//! Exact token counting with a HuggingFace `tokenizer.json`.

use ragchat_core::TokenCounter;
use ragchat_core::error::ProviderError;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::{info, warn};

/// A [`TokenCounter`] backed by a HuggingFace tokenizer file.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
}

impl HfTokenCounter {
    /// Load a tokenizer from a `tokenizer.json` file.
    pub fn from_file(path: &Path) -> Result<Self, ProviderError> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            ProviderError::NotConfigured(format!(
                "Failed to load tokenizer from {}: {e}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), "Loaded tokenizer");
        Ok(Self { tokenizer })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(encoding) => encoding.len(),
            Err(e) => {
                // Overestimate rather than underestimate the budget.
                warn!(error = %e, "Tokenizer failed, counting bytes");
                text.len()
            }
        }
    }
}

impl std::fmt::Debug for HfTokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenCounter").finish_non_exhaustive()
    }
}
