//! The exchange orchestrator.
//!
//! One exchange = lock → reformulate → retrieve → assemble → generate →
//! commit, all inside the conversation's critical section. The reformulation
//! pair and the question/answer pair reach history together, or not at all.

use crate::answer::{AnswerGenerator, AnswerStream, PendingExchange};
use crate::prompt::{AnswerPrompt, PromptAssembler};
use crate::reformulate::{QuestionReformulator, Reformulation};
use ragchat_config::{AppConfig, BusyPolicy};
use ragchat_core::{
    ChunkSource, CompletionEngine, ConversationId, Error, Result, TokenCounter, TokenUsage,
};
use ragchat_memory::{ConversationLock, ConversationStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The outcome of a batch exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    /// The standalone query used for retrieval.
    pub reformulated_question: String,
    /// Usage of both engine calls.
    pub usage: TokenUsage,
    /// Reference chunks that fit in the prompt.
    pub included_chunks: usize,
    /// Some candidate chunks were left out for lack of budget.
    pub truncated: bool,
}

pub struct ChatService {
    store: ConversationStore,
    chunks: Arc<dyn ChunkSource>,
    assembler: Arc<PromptAssembler>,
    reformulator: QuestionReformulator,
    generator: AnswerGenerator,
    max_relevant_chunks: usize,
    on_busy: BusyPolicy,
}

impl ChatService {
    /// Wire a service from configuration and its collaborators.
    pub fn new(
        config: &AppConfig,
        store: ConversationStore,
        engine: Arc<dyn CompletionEngine>,
        counter: Arc<dyn TokenCounter>,
        chunks: Arc<dyn ChunkSource>,
    ) -> Self {
        let chat = &config.chat;
        let provider = &config.provider;

        let assembler = Arc::new(
            PromptAssembler::new(counter, chat.max_input_tokens, chat.max_output_tokens)
                .with_reformulation_history_tokens(chat.reformulation_history_tokens),
        );
        let reformulator = QuestionReformulator::new(
            engine.clone(),
            assembler.clone(),
            &provider.model,
            provider.temperature,
        );
        let generator = AnswerGenerator::new(
            engine,
            &provider.model,
            provider.temperature,
            chat.max_output_tokens,
        );

        Self {
            store,
            chunks,
            assembler,
            reformulator,
            generator,
            max_relevant_chunks: chat.max_relevant_chunks,
            on_busy: chat.on_busy,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Reformulate `question` against the conversation and commit the pair.
    pub async fn reformulate(&self, id: &ConversationId, question: &str) -> Result<Reformulation> {
        let lock = self.acquire(id).await?;
        self.reformulator.reformulate(&lock, question).await
    }

    /// Run a full batch exchange.
    pub async fn ask(&self, id: &ConversationId, question: &str) -> Result<ChatResponse> {
        let lock = self.acquire(id).await?;
        let (reformulation, prompt) = self.prepare(&lock, question).await?;

        let reformulated_question = reformulation.text.clone();
        let answer = self
            .generator
            .generate_after(&lock, pending(reformulation), question, &prompt)
            .await?;

        info!(
            conversation_id = %id,
            included = prompt.included,
            truncated = prompt.truncated,
            total_tokens = answer.usage.total(),
            "Exchange completed"
        );

        Ok(ChatResponse {
            answer: answer.text,
            reformulated_question,
            usage: answer.usage,
            included_chunks: prompt.included,
            truncated: prompt.truncated,
        })
    }

    /// Run a full streaming exchange.
    ///
    /// The conversation stays locked until the returned stream finishes or
    /// is dropped. Cancelling `cancel` before the stream is returned abandons
    /// the lock wait, the reformulation or the retrieval with
    /// [`Error::Cancelled`] and releases the conversation.
    pub async fn ask_streaming(
        &self,
        id: &ConversationId,
        question: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<AnswerStream> {
        let Some(token) = cancel.clone() else {
            return self.start_streaming(id, question, None).await;
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(conversation_id = %id, "Exchange cancelled before streaming");
                Err(Error::Cancelled)
            }
            result = self.start_streaming(id, question, cancel) => result,
        }
    }

    async fn start_streaming(
        &self,
        id: &ConversationId,
        question: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<AnswerStream> {
        let lock = self.acquire(id).await?;
        let (reformulation, prompt) = self.prepare(&lock, question).await?;

        let reformulated_question = reformulation.text.clone();
        let stream = self
            .generator
            .stream(lock, pending(reformulation), question, &prompt, cancel)
            .await?;

        info!(conversation_id = %id, included = prompt.included, "Streaming exchange started");
        Ok(stream.with_reformulated_question(reformulated_question))
    }

    async fn acquire(&self, id: &ConversationId) -> Result<ConversationLock> {
        match self.on_busy {
            BusyPolicy::Queue => Ok(self.store.lock(id).await),
            BusyPolicy::Reject => self.store.try_lock(id),
        }
    }

    /// Draft the reformulation, retrieve candidates, and build the answer prompt.
    async fn prepare(
        &self,
        lock: &ConversationLock,
        question: &str,
    ) -> Result<(Reformulation, AnswerPrompt)> {
        let reformulation = self.reformulator.draft(lock, question).await?;

        let candidates = self
            .chunks
            .search(&reformulation.text, self.max_relevant_chunks)
            .await?;
        debug!(
            conversation_id = %lock.id(),
            source = self.chunks.name(),
            candidates = candidates.len(),
            "Retrieved chunks"
        );

        let prompt = self.assembler.answer_prompt(question, &candidates);
        Ok((reformulation, prompt))
    }
}

fn pending(reformulation: Reformulation) -> PendingExchange {
    let usage = reformulation.usage;
    PendingExchange {
        messages: reformulation.into_pending(),
        usage,
    }
}
