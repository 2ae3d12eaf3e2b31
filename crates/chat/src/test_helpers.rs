//! Shared test helpers: a scripted completion engine.

use ragchat_core::error::ProviderError;
use ragchat_core::message::Message;
use ragchat_core::provider::{
    Completion, CompletionEngine, CompletionRequest, FragmentReceiver, StreamFragment, TokenUsage,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Usage reported by every scripted batch reply.
pub const REPLY_USAGE: TokenUsage = TokenUsage {
    input_tokens: 10,
    output_tokens: 5,
};

/// How a scripted stream ends after its content fragments.
#[derive(Debug, Clone)]
pub enum Ending {
    /// Terminal fragment carrying this usage.
    Usage(TokenUsage),
    /// Channel closes without a terminal fragment.
    Interrupt,
    /// Channel stays open until the receiver is dropped.
    Hang,
    /// An error item.
    Error(ProviderError),
}

#[derive(Debug, Clone)]
pub enum Script {
    Reply(String),
    Stream { parts: Vec<String>, ending: Ending },
    Fail(ProviderError),
    /// The call never returns.
    Pending,
}

/// A mock engine that plays back one script entry per call, in order.
///
/// Panics if more calls are made than entries provided.
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<CompletionRequest>>,
    receiver_dropped: Arc<AtomicBool>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            receiver_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Batch replies, one per call.
    pub fn replies(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Script::Reply(t.to_string())).collect())
    }

    /// Fails every call.
    pub fn failing() -> Self {
        Self::new(
            (0..4)
                .map(|_| Script::Fail(ProviderError::Network("connection refused".into())))
                .collect(),
        )
    }

    pub fn stream(parts: &[&str], ending: Ending) -> Script {
        Script::Stream {
            parts: parts.iter().map(|p| p.to_string()).collect(),
            ending,
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether a hanging stream observed its receiver going away.
    pub fn receiver_dropped(&self) -> bool {
        self.receiver_dropped.load(Ordering::SeqCst)
    }

    fn next(&self, request: CompletionRequest) -> Script {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedEngine: no more scripted responses")
    }
}

#[async_trait::async_trait]
impl CompletionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let model = request.model.clone();
        match self.next(request) {
            Script::Reply(text) => Ok(Completion {
                message: Message::assistant(text),
                usage: Some(REPLY_USAGE),
                model,
            }),
            Script::Fail(e) => Err(e),
            Script::Pending => std::future::pending().await,
            Script::Stream { .. } => panic!("ScriptedEngine: stream script used for complete()"),
        }
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentReceiver, ProviderError> {
        let (parts, ending) = match self.next(request) {
            Script::Stream { parts, ending } => (parts, ending),
            Script::Fail(e) => return Err(e),
            Script::Pending => std::future::pending().await,
            Script::Reply(text) => (vec![text], Ending::Usage(REPLY_USAGE)),
        };

        let (tx, rx) = mpsc::channel(parts.len() + 1);
        let dropped = self.receiver_dropped.clone();
        tokio::spawn(async move {
            for part in parts {
                if tx.send(Ok(StreamFragment::text(part))).await.is_err() {
                    dropped.store(true, Ordering::SeqCst);
                    return;
                }
            }
            match ending {
                Ending::Usage(usage) => {
                    let _ = tx.send(Ok(StreamFragment::terminal(Some(usage)))).await;
                }
                Ending::Interrupt => {}
                Ending::Hang => {
                    tx.closed().await;
                    dropped.store(true, Ordering::SeqCst);
                }
                Ending::Error(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        Ok(rx)
    }
}
