//! Completion engine implementations for ragchat.
//!
//! All engines implement the `ragchat_core::CompletionEngine` trait.
//! [`build_engine`] and [`build_token_counter`] select implementations
//! from configuration.

pub mod openai_compat;
#[cfg(feature = "tokenizers")]
pub mod tokenizer;

pub use openai_compat::OpenAiCompatEngine;
#[cfg(feature = "tokenizers")]
pub use tokenizer::HfTokenCounter;

use ragchat_config::AppConfig;
use ragchat_core::error::ProviderError;
use ragchat_core::{CompletionEngine, HeuristicTokenCounter, TokenCounter};
use std::sync::Arc;
use tracing::debug;

/// Build the completion engine named in the configuration.
///
/// Every supported name speaks the OpenAI chat-completions protocol; they
/// differ only in defaults.
pub fn build_engine(config: &AppConfig) -> Result<Arc<dyn CompletionEngine>, ProviderError> {
    let name = config.provider.name.as_str();
    let api_key = config.api_key.clone().unwrap_or_default();

    let engine = match name {
        "ollama" => OpenAiCompatEngine::ollama(Some(&config.provider.api_url)),
        "openai" | "azure" | "openrouter" | "vllm" | "custom" => {
            if api_key.is_empty() {
                return Err(ProviderError::NotConfigured(format!(
                    "No API key set for engine '{name}'. Set RAGCHAT_API_KEY or api_key in config.toml"
                )));
            }
            OpenAiCompatEngine::new(name, &config.provider.api_url, api_key)
        }
        other => {
            return Err(ProviderError::NotConfigured(format!(
                "Unknown engine '{other}'"
            )));
        }
    };

    debug!(engine = name, url = %config.provider.api_url, "Built completion engine");
    Ok(Arc::new(engine))
}

/// Build the token counter for the configured engine.
///
/// Uses the configured tokenizer file when the `tokenizers` feature is
/// enabled, and the character heuristic otherwise.
pub fn build_token_counter(config: &AppConfig) -> Result<Arc<dyn TokenCounter>, ProviderError> {
    match &config.provider.tokenizer_path {
        #[cfg(feature = "tokenizers")]
        Some(path) => Ok(Arc::new(HfTokenCounter::from_file(path)?)),
        #[cfg(not(feature = "tokenizers"))]
        Some(path) => {
            tracing::warn!(
                path = %path.display(),
                "tokenizer_path is set but ragchat was built without the `tokenizers` feature; using heuristic counts"
            );
            Ok(Arc::new(HeuristicTokenCounter))
        }
        None => Ok(Arc::new(HeuristicTokenCounter)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_requires_key() {
        let mut config = AppConfig::default();
        config.api_key = None;
        let err = build_engine(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn openai_with_key() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-test".into());
        let engine = build_engine(&config).unwrap();
        assert_eq!(engine.name(), "openai");
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut config = AppConfig::default();
        config.api_key = None;
        config.provider.name = "ollama".into();
        config.provider.api_url = "http://localhost:11434/v1".into();
        assert_eq!(build_engine(&config).unwrap().name(), "ollama");
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let mut config = AppConfig::default();
        config.api_key = Some("k".into());
        config.provider.name = "mystery".into();
        assert!(build_engine(&config).is_err());
    }

    #[test]
    fn default_counter_is_heuristic() {
        let counter = build_token_counter(&AppConfig::default()).unwrap();
        assert_eq!(counter.count("test"), 1);
    }
}
