//! Events surfaced by a streaming answer.
//!
//! Serializable so a transport can forward them as SSE or WebSocket frames:
//! - `fragment` — a piece of answer text, in order
//! - `usage`    — final token usage; always the last event, sent after history is committed

use ragchat_core::TokenUsage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEvent {
    /// Partial answer text.
    Fragment { content: String },

    /// Accumulated usage of the whole exchange.
    Usage { usage: TokenUsage },
}

impl AnswerEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Fragment { .. } => "fragment",
            Self::Usage { .. } => "usage",
        }
    }

    pub fn as_fragment(&self) -> Option<&str> {
        match self {
            Self::Fragment { content } => Some(content),
            Self::Usage { .. } => None,
        }
    }
}
