//! # ragchat Chat
//!
//! The exchange pipeline: turns a question plus conversation history into a
//! grounded answer.
//!
//! ```text
//! question ─▶ QuestionReformulator ─▶ ChunkSource ─▶ PromptAssembler ─▶ AnswerGenerator
//!                   │                                     │                   │
//!            ConversationStore                   TokenBudgetPlanner     AnswerStream
//! ```
//!
//! [`ChatService`] runs the whole pipeline as one critical section per
//! conversation.

pub mod answer;
pub mod planner;
pub mod prompt;
pub mod reformulate;
pub mod service;
pub mod stream_event;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use answer::{Answer, AnswerGenerator, AnswerStream, PendingExchange};
pub use planner::{PromptPlan, TokenBudgetPlanner};
pub use prompt::{AnswerPrompt, PromptAssembler};
pub use reformulate::{QuestionReformulator, Reformulation};
pub use service::{ChatResponse, ChatService};
pub use stream_event::AnswerEvent;
