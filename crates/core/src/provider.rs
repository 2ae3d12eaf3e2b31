//! CompletionEngine trait — the abstraction over language-model backends.
//!
//! An engine takes an ordered message sequence and produces either a complete
//! assistant message or a finite stream of text fragments ending in a
//! usage-bearing terminal fragment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a single completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// The prompt messages, in order
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated assistant message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<TokenUsage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Input/output token counts of one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(rhs.input_tokens),
            output_tokens: self.output_tokens.saturating_add(rhs.output_tokens),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// A single fragment of a streaming response.
///
/// Content fragments carry text; the terminal fragment has `done = true`,
/// no text, and (usually) the final usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final fragment
    #[serde(default)]
    pub done: bool,

    /// Usage info (only on the terminal fragment)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamFragment {
    /// A content fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
            usage: None,
        }
    }

    /// The terminal, usage-bearing fragment.
    pub fn terminal(usage: Option<TokenUsage>) -> Self {
        Self {
            content: None,
            done: true,
            usage,
        }
    }
}

/// Receiving half of a fragment stream. Dropping it tells the producer to stop.
pub type FragmentReceiver = mpsc::Receiver<std::result::Result<StreamFragment, ProviderError>>;

/// The core CompletionEngine trait.
///
/// Every model backend implements this trait. The chat pipeline calls
/// `complete()` or `stream()` without knowing which backend is in use.
#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// A human-readable name for this engine (e.g., "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of response fragments.
    ///
    /// Default implementation calls `complete()` and replays the result as one
    /// content fragment followed by the terminal fragment.
    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<FragmentReceiver, ProviderError> {
        let completion = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(2);
        if !completion.message.content.is_empty() {
            let _ = tx
                .send(Ok(StreamFragment::text(completion.message.content)))
                .await;
        }
        let _ = tx.send(Ok(StreamFragment::terminal(completion.usage))).await;
        Ok(rx)
    }

    /// Health check — can we reach the engine?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
