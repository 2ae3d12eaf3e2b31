//! Prompt assembly for the two engine calls of an exchange.
//!
//! Token accounting for the answer prompt: the system instruction, the user
//! header (question included) and the reserved output tokens are subtracted
//! from the input ceiling first; chunks then compete for what is left through
//! the [`TokenBudgetPlanner`].

use crate::planner::TokenBudgetPlanner;
use ragchat_core::{Chunk, Message, TokenCounter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Separator written before every chunk in the answer prompt.
pub const CHUNK_SEPARATOR: &str = "---\n";

const REFORMULATION_SYSTEM: &str = "You turn follow-up questions into standalone queries \
for a document search engine, using the conversation so far to resolve references.";

const ANSWER_SYSTEM: &str = "Answer only with the information provided in this conversation. \
If that information does not contain the answer, say that it is not available in the given \
context and suggest refining the question. Do not answer questions unrelated to the provided \
information. Always reply in the language of the question.";

fn reformulation_request(question: &str) -> String {
    format!(
        "Rewrite the question below so that it can be used on its own to search the documents, \
         taking the previous messages into account.\n\
         ---\n\
         {question}\n\
         ---\n\
         Write the rewritten question in the same language as the original one. \
         Reply with the question only: do not add phrases like \"in this chat\", \
         \"in the context of our conversation\" or \"search for\"."
    )
}

fn answer_header(question: &str) -> String {
    format!("Answer the following question:\n---\n{question}\n=====\nUsing the following information:\n")
}

/// The rendered form of one chunk inside the answer prompt.
fn render_chunk(chunk: &Chunk) -> String {
    let mut text = format!("{CHUNK_SEPARATOR}{}", chunk.content);
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

// ── Types ─────────────────────────────────────────────────────────────────

/// An assembled answer prompt plus its plan statistics.
#[derive(Debug, Clone)]
pub struct AnswerPrompt {
    /// System instruction followed by the single user message.
    pub messages: Vec<Message>,
    /// How many candidate chunks made it into the prompt.
    pub included: usize,
    /// Token budget left unused.
    pub remaining: usize,
    /// At least one candidate was left out for lack of budget.
    pub truncated: bool,
    /// Tokens set aside before planning.
    pub reserved: usize,
}

impl AnswerPrompt {
    /// Budget was exhausted before any chunk could be included.
    pub fn is_degraded(&self) -> bool {
        self.included == 0 && self.truncated
    }
}

/// Builds the reformulation and answer prompts.
pub struct PromptAssembler {
    counter: Arc<dyn TokenCounter>,
    max_input_tokens: usize,
    max_output_tokens: u32,
    reformulation_history_tokens: Option<usize>,
}

impl PromptAssembler {
    pub fn new(counter: Arc<dyn TokenCounter>, max_input_tokens: usize, max_output_tokens: u32) -> Self {
        Self {
            counter,
            max_input_tokens,
            max_output_tokens,
            reformulation_history_tokens: None,
        }
    }

    /// Limit the history sent for reformulation to the newest messages that
    /// fit in `tokens`.
    pub fn with_reformulation_history_tokens(mut self, tokens: Option<usize>) -> Self {
        self.reformulation_history_tokens = tokens;
        self
    }

    pub fn max_output_tokens(&self) -> u32 {
        self.max_output_tokens
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Instruction + (possibly budgeted) history + the wrapped question.
    pub fn reformulation_prompt(&self, history: &[Message], question: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(REFORMULATION_SYSTEM));

        match self.reformulation_history_tokens {
            None => messages.extend(history.iter().cloned()),
            Some(budget) => {
                // Newest first, so the planner's prefix is the most recent window.
                let newest_first: Vec<&Message> = history.iter().rev().collect();
                let plan = TokenBudgetPlanner::new(budget)
                    .plan(&newest_first, 0, |m| self.counter.count(&m.content));
                if plan.truncated {
                    debug!(
                        kept = plan.included.len(),
                        dropped = history.len() - plan.included.len(),
                        "Trimmed history for reformulation"
                    );
                }
                messages.extend(plan.included.iter().rev().map(|m| (*m).clone()));
            }
        }

        messages.push(Message::user(reformulation_request(question)));
        messages
    }

    /// System instruction + one user message holding the question and every
    /// chunk that fits, in order.
    pub fn answer_prompt(&self, question: &str, chunks: &[Chunk]) -> AnswerPrompt {
        let header = answer_header(question);
        let reserved = self.counter.count(ANSWER_SYSTEM)
            + self.counter.count(&header)
            + self.max_output_tokens as usize;

        let planner = TokenBudgetPlanner::new(self.max_input_tokens);
        let plan = planner.plan(chunks, reserved, |chunk| {
            self.counter.count(&render_chunk(chunk))
        });

        let mut user = header;
        for chunk in plan.included {
            user.push_str(&render_chunk(chunk));
        }

        if plan.is_degraded() {
            warn!(
                candidates = chunks.len(),
                reserved,
                ceiling = self.max_input_tokens,
                "No budget left for reference chunks; answering without context"
            );
        } else {
            debug!(
                included = plan.included.len(),
                candidates = chunks.len(),
                remaining = plan.remaining,
                truncated = plan.truncated,
                "Planned answer prompt"
            );
        }

        AnswerPrompt {
            messages: vec![Message::system(ANSWER_SYSTEM), Message::user(user)],
            included: plan.included.len(),
            remaining: plan.remaining,
            truncated: plan.truncated,
            reserved,
        }
    }
}

impl std::fmt::Debug for PromptAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptAssembler")
            .field("max_input_tokens", &self.max_input_tokens)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("reformulation_history_tokens", &self.reformulation_history_tokens)
            .finish_non_exhaustive()
    }
}
