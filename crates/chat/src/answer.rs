//! Answer generation, batch and streaming.
//!
//! History is written once, after the engine has produced a complete,
//! non-empty answer. Every failure path, cancellation included, leaves the
//! conversation as it was.
//!
//! # Streaming states
//!
//! ```text
//! Receiving ──fragment──▶ Receiving
//!     │ terminal            │ cancel / error / interrupted
//!     ▼                     ▼
//! Terminal ──commit──▶ Finished
//! ```

use crate::prompt::AnswerPrompt;
use crate::stream_event::AnswerEvent;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use ragchat_core::error::ProviderError;
use ragchat_core::provider::FragmentReceiver;
use ragchat_core::{CompletionEngine, CompletionRequest, Error, Message, Result, TokenUsage};
use ragchat_memory::ConversationLock;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// Messages and usage produced by earlier steps of the same exchange.
///
/// They are committed together with the answer, or not at all.
#[derive(Debug, Clone, Default)]
pub struct PendingExchange {
    pub messages: Vec<Message>,
    pub usage: TokenUsage,
}

/// A complete batch answer.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Usage of the whole exchange, earlier steps included.
    pub usage: TokenUsage,
}

pub struct AnswerGenerator {
    engine: Arc<dyn CompletionEngine>,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl AnswerGenerator {
    pub fn new(
        engine: Arc<dyn CompletionEngine>,
        model: impl Into<String>,
        temperature: f32,
        max_output_tokens: u32,
    ) -> Self {
        Self {
            engine,
            model: model.into(),
            temperature,
            max_output_tokens,
        }
    }

    fn request(&self, prompt: &AnswerPrompt) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            messages: prompt.messages.clone(),
            temperature: self.temperature,
            max_tokens: Some(self.max_output_tokens),
        }
    }

    /// Generate a full answer and commit the question/answer pair.
    pub async fn generate(
        &self,
        lock: &ConversationLock,
        question: &str,
        prompt: &AnswerPrompt,
    ) -> Result<Answer> {
        self.generate_after(lock, PendingExchange::default(), question, prompt)
            .await
    }

    /// Like [`generate`](Self::generate), committing `pending` ahead of the pair.
    pub async fn generate_after(
        &self,
        lock: &ConversationLock,
        pending: PendingExchange,
        question: &str,
        prompt: &AnswerPrompt,
    ) -> Result<Answer> {
        debug!(
            conversation_id = %lock.id(),
            model = %self.model,
            included = prompt.included,
            "Requesting answer"
        );

        let completion = self.engine.complete(self.request(prompt)).await?;
        let text = completion.message.content;
        if text.trim().is_empty() {
            return Err(Error::EmptyCompletion);
        }
        let answer_usage = completion.usage.unwrap_or_default();

        let mut messages = pending.messages;
        messages.push(Message::user(question));
        messages.push(Message::assistant(text.clone()).with_usage(answer_usage));
        lock.append_exchange(messages).await?;

        let usage = pending.usage + answer_usage;
        info!(
            conversation_id = %lock.id(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Answer generated"
        );
        Ok(Answer { text, usage })
    }

    /// Start a streaming answer.
    ///
    /// The stream owns `lock` until it finishes or is dropped. With a `cancel`
    /// token, cancelling ends the stream with [`Error::Cancelled`]; dropping
    /// the stream has the same effect on history without the final error.
    pub async fn stream(
        &self,
        lock: ConversationLock,
        pending: PendingExchange,
        question: &str,
        prompt: &AnswerPrompt,
        cancel: Option<CancellationToken>,
    ) -> Result<AnswerStream> {
        debug!(
            conversation_id = %lock.id(),
            model = %self.model,
            included = prompt.included,
            "Requesting streaming answer"
        );

        let rx = self.engine.stream(self.request(prompt)).await?;

        let receiving = Receiving {
            rx,
            lock,
            question: question.to_string(),
            pending,
            answer: String::new(),
            cancel,
        };

        Ok(AnswerStream {
            inner: stream::unfold(State::Receiving(receiving), step).boxed(),
            included_chunks: prompt.included,
            truncated: prompt.truncated,
            reformulated_question: None,
        })
    }
}

// ── Streaming ─────────────────────────────────────────────────────────────

/// A finite, non-restartable stream of [`AnswerEvent`]s.
///
/// Yields fragments in order, then exactly one `Usage` event once the answer
/// has been committed. Any error is the last item.
pub struct AnswerStream {
    inner: BoxStream<'static, Result<AnswerEvent>>,
    included_chunks: usize,
    truncated: bool,
    reformulated_question: Option<String>,
}

impl AnswerStream {
    pub(crate) fn with_reformulated_question(mut self, question: String) -> Self {
        self.reformulated_question = Some(question);
        self
    }

    /// The standalone query used for retrieval, when the exchange had one.
    pub fn reformulated_question(&self) -> Option<&str> {
        self.reformulated_question.as_deref()
    }

    /// Number of reference chunks in the prompt.
    pub fn included_chunks(&self) -> usize {
        self.included_chunks
    }

    /// Whether some candidate chunks were left out for lack of budget.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl Stream for AnswerStream {
    type Item = Result<AnswerEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("included_chunks", &self.included_chunks)
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

struct Receiving {
    rx: FragmentReceiver,
    lock: ConversationLock,
    question: String,
    pending: PendingExchange,
    answer: String,
    cancel: Option<CancellationToken>,
}

enum State {
    Receiving(Receiving),
    /// The terminal fragment arrived; commit and report usage.
    Terminal(Receiving, Option<TokenUsage>),
    Finished,
}

enum Next {
    Cancelled,
    Item(Option<std::result::Result<ragchat_core::StreamFragment, ProviderError>>),
}

async fn step(state: State) -> Option<(Result<AnswerEvent>, State)> {
    match state {
        State::Finished => None,
        State::Terminal(receiving, usage) => Some((commit(receiving, usage).await, State::Finished)),
        State::Receiving(mut receiving) => loop {
            let next = match &receiving.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Next::Cancelled,
                    item = receiving.rx.recv() => Next::Item(item),
                },
                None => Next::Item(receiving.rx.recv().await),
            };

            match next {
                Next::Cancelled => {
                    info!(
                        conversation_id = %receiving.lock.id(),
                        received = receiving.answer.len(),
                        "Streaming answer cancelled"
                    );
                    return Some((Err(Error::Cancelled), State::Finished));
                }
                Next::Item(None) => {
                    warn!(
                        conversation_id = %receiving.lock.id(),
                        "Fragment stream closed without a terminal fragment"
                    );
                    let err = ProviderError::StreamInterrupted(
                        "stream ended before the terminal fragment".into(),
                    );
                    return Some((Err(err.into()), State::Finished));
                }
                Next::Item(Some(Err(e))) => {
                    warn!(conversation_id = %receiving.lock.id(), error = %e, "Streaming answer failed");
                    return Some((Err(e.into()), State::Finished));
                }
                Next::Item(Some(Ok(fragment))) => {
                    let text = fragment.content.filter(|c| !c.is_empty());
                    match (text, fragment.done) {
                        (Some(text), done) => {
                            receiving.answer.push_str(&text);
                            let next = if done {
                                State::Terminal(receiving, fragment.usage)
                            } else {
                                State::Receiving(receiving)
                            };
                            return Some((Ok(AnswerEvent::Fragment { content: text }), next));
                        }
                        (None, true) => {
                            return Some((commit(receiving, fragment.usage).await, State::Finished));
                        }
                        (None, false) => continue,
                    }
                }
            }
        },
    }
}

/// Commit the streamed exchange and produce the final usage event.
async fn commit(receiving: Receiving, usage: Option<TokenUsage>) -> Result<AnswerEvent> {
    let Receiving {
        lock,
        question,
        pending,
        answer,
        ..
    } = receiving;

    if answer.trim().is_empty() {
        return Err(Error::EmptyCompletion);
    }

    let answer_usage = usage.unwrap_or_default();
    let mut messages = pending.messages;
    messages.push(Message::user(question));
    messages.push(Message::assistant(answer).with_usage(answer_usage));
    lock.append_exchange(messages).await?;

    let usage = pending.usage + answer_usage;
    info!(
        conversation_id = %lock.id(),
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "Streaming answer committed"
    );
    Ok(AnswerEvent::Usage { usage })
}
