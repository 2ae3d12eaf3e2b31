//! Question reformulation: turn a follow-up question into a standalone
//! search query using the conversation so far.

use crate::prompt::PromptAssembler;
use ragchat_core::{CompletionEngine, CompletionRequest, Error, Message, Result, TokenUsage};
use ragchat_memory::ConversationLock;
use std::sync::Arc;
use tracing::{debug, info};

/// A reformulated question and the history entries it produces.
#[derive(Debug, Clone)]
pub struct Reformulation {
    /// The standalone query returned by the engine.
    pub text: String,
    /// Usage of the reformulation call (zero if the engine reported none).
    pub usage: TokenUsage,
    pending: Vec<Message>,
}

impl Reformulation {
    /// The User/Assistant pair not yet written to history.
    pub fn pending(&self) -> &[Message] {
        &self.pending
    }

    pub fn into_pending(self) -> Vec<Message> {
        self.pending
    }
}

pub struct QuestionReformulator {
    engine: Arc<dyn CompletionEngine>,
    assembler: Arc<PromptAssembler>,
    model: String,
    temperature: f32,
}

impl QuestionReformulator {
    pub fn new(
        engine: Arc<dyn CompletionEngine>,
        assembler: Arc<PromptAssembler>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            engine,
            assembler,
            model: model.into(),
            temperature,
        }
    }

    /// Reformulate `question` and commit the pair to history.
    pub async fn reformulate(&self, lock: &ConversationLock, question: &str) -> Result<Reformulation> {
        let reformulation = self.draft(lock, question).await?;
        lock.append_exchange(reformulation.pending.clone()).await?;
        Ok(reformulation)
    }

    /// Reformulate `question` without touching history.
    pub async fn draft(&self, lock: &ConversationLock, question: &str) -> Result<Reformulation> {
        let history = lock.history().await?;
        let messages = self.assembler.reformulation_prompt(&history, question);

        debug!(
            conversation_id = %lock.id(),
            history = history.len(),
            "Reformulating question"
        );

        let completion = self
            .engine
            .complete(CompletionRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
                max_tokens: Some(self.assembler.max_output_tokens()),
            })
            .await?;

        let text = completion.message.content.trim().to_string();
        if text.is_empty() {
            return Err(Error::EmptyCompletion);
        }
        let usage = completion.usage.unwrap_or_default();

        info!(
            conversation_id = %lock.id(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Question reformulated"
        );

        let pending = vec![
            Message::user(question),
            Message::assistant(text.clone()).with_usage(usage),
        ];
        Ok(Reformulation {
            text,
            usage,
            pending,
        })
    }
}
