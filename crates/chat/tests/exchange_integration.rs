//! End-to-end exchange tests.
//!
//! Drive `ChatService` through a scripted engine, the in-memory store and
//! the keyword chunk source, and check what reaches history.

use async_trait::async_trait;
use futures::StreamExt;
use ragchat_chat::{AnswerEvent, ChatService};
use ragchat_config::{AppConfig, BusyPolicy};
use ragchat_core::error::ProviderError;
use ragchat_core::provider::FragmentReceiver;
use ragchat_core::{
    Completion, CompletionEngine, CompletionRequest, ConversationId, Error, Expiration, HeuristicTokenCounter,
    Message, StreamFragment, TokenUsage,
};
use ragchat_memory::{ConversationStore, KeywordChunkSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

// ── Mock engine ───────────────────────────────────────────────────────────

/// Batch calls answer from `replies`; streaming calls play back `fragments`.
///
/// A stream with `terminal: false` stays open until the receiver goes away.
struct ScriptedEngine {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    fragments: Vec<String>,
    terminal: bool,
}

impl ScriptedEngine {
    fn new(replies: Vec<Result<&str, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            fragments: Vec::new(),
            terminal: true,
        }
    }

    fn streaming(mut self, fragments: &[&str], terminal: bool) -> Self {
        self.fragments = fragments.iter().map(|f| f.to_string()).collect();
        self.terminal = terminal;
        self
    }
}

#[async_trait]
impl CompletionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("no scripted reply left")?;
        Ok(Completion {
            message: Message::assistant(reply),
            usage: Some(TokenUsage::new(10, 5)),
            model: request.model,
        })
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<FragmentReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.fragments.len() + 1);
        let fragments = self.fragments.clone();
        let terminal = self.terminal;
        tokio::spawn(async move {
            for fragment in fragments {
                if tx.send(Ok(StreamFragment::text(fragment))).await.is_err() {
                    return;
                }
            }
            if terminal {
                let _ = tx
                    .send(Ok(StreamFragment::terminal(Some(TokenUsage::new(100, 5)))))
                    .await;
            } else {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

// ── Fixtures ──────────────────────────────────────────────────────────────

async fn knowledge() -> Arc<KeywordChunkSource> {
    let source = KeywordChunkSource::new();
    source
        .add(
            "Ferris is the unofficial mascot of the Rust programming language.",
            Some("mascot.md".into()),
        )
        .await;
    source
        .add(
            "Cargo is the Rust package manager and build tool.",
            Some("cargo.md".into()),
        )
        .await;
    Arc::new(source)
}

async fn service(engine: ScriptedEngine, config: &AppConfig) -> ChatService {
    ChatService::new(
        config,
        ConversationStore::in_memory(config.conversation.max_messages, Expiration::default()),
        Arc::new(engine),
        Arc::new(HeuristicTokenCounter),
        knowledge().await,
    )
}

async fn seeded(chat: &ChatService, id: &ConversationId) -> Vec<Message> {
    chat.store()
        .append_exchange(
            id,
            vec![
                Message::user("What is Ferris?"),
                Message::assistant("Ferris is the Rust mascot."),
            ],
        )
        .await
        .unwrap();
    chat.store().get(id).await.unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_exchange_round_trip() {
    let engine = ScriptedEngine::new(vec![
        Ok("What does the Rust mascot Ferris look like?"),
        Ok("Ferris is a crab."),
    ]);
    let chat = service(engine, &AppConfig::default()).await;
    let id = ConversationId::new();
    let before = seeded(&chat, &id).await;

    let response = chat.ask(&id, "What does it look like?").await.unwrap();

    assert_eq!(response.answer, "Ferris is a crab.");
    assert_eq!(response.usage, TokenUsage::new(20, 10));
    assert!(response.included_chunks >= 1);

    let history = chat.store().get(&id).await.unwrap();
    assert_eq!(history.len(), before.len() + 4);
    assert_eq!(&history[..before.len()], before.as_slice());
    assert_eq!(history.last().unwrap().content, "Ferris is a crab.");
}

#[tokio::test]
async fn cancelled_stream_leaves_history_byte_identical() {
    let engine = ScriptedEngine::new(vec![Ok("Ferris mascot appearance")])
        .streaming(&["Ferris ", "is ", "a ", "friendly ", "crab."], false);
    let chat = service(engine, &AppConfig::default()).await;
    let id = ConversationId::new();
    let before = seeded(&chat, &id).await;
    let before_json = serde_json::to_string(&before).unwrap();

    let cancel = CancellationToken::new();
    let mut stream = chat
        .ask_streaming(&id, "What does it look like?", Some(cancel.clone()))
        .await
        .unwrap();

    let mut received = Vec::new();
    while received.len() < 2 {
        match stream.next().await {
            Some(Ok(AnswerEvent::Fragment { content })) => received.push(content),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    cancel.cancel();

    assert!(matches!(stream.next().await, Some(Err(Error::Cancelled))));
    assert!(stream.next().await.is_none());
    assert_eq!(received, ["Ferris ", "is "]);

    let after = chat.store().get(&id).await.unwrap();
    assert_eq!(serde_json::to_string(&after).unwrap(), before_json);

    // The conversation is free again.
    assert!(chat.store().try_lock(&id).is_ok());
}

#[tokio::test]
async fn dropped_stream_releases_the_conversation() {
    let engine = ScriptedEngine::new(vec![Ok("Ferris mascot"), Ok("Ferris"), Ok("A crab.")])
        .streaming(&["Ferris ", "is "], false);
    let chat = service(engine, &AppConfig::default()).await;
    let id = ConversationId::new();
    let before = seeded(&chat, &id).await;

    let mut stream = chat.ask_streaming(&id, "And it is?", None).await.unwrap();
    assert!(stream.next().await.is_some());
    drop(stream);

    assert_eq!(chat.store().get(&id).await.unwrap(), before);

    // A queued exchange can proceed right away.
    let response = chat.ask(&id, "What is it?").await.unwrap();
    assert_eq!(response.answer, "A crab.");
}

#[tokio::test]
async fn engine_failure_mutates_nothing() {
    let engine = ScriptedEngine::new(vec![
        Ok("Cargo build tool"),
        Err(ProviderError::ApiError {
            status_code: 500,
            message: "internal error".into(),
        }),
    ]);
    let chat = service(engine, &AppConfig::default()).await;
    let id = ConversationId::new();
    let before = seeded(&chat, &id).await;

    let err = chat.ask(&id, "What builds Rust code?").await.unwrap_err();

    assert!(matches!(
        err,
        Error::CompletionEngine(ProviderError::ApiError { status_code: 500, .. })
    ));
    assert_eq!(chat.store().get(&id).await.unwrap(), before);
}

#[tokio::test]
async fn empty_reformulation_mutates_nothing() {
    let engine = ScriptedEngine::new(vec![Ok("")]);
    let chat = service(engine, &AppConfig::default()).await;
    let id = ConversationId::new();
    let before = seeded(&chat, &id).await;

    let err = chat.ask(&id, "Hm?").await.unwrap_err();

    assert!(matches!(err, Error::EmptyCompletion));
    assert_eq!(chat.store().get(&id).await.unwrap(), before);
}

#[tokio::test]
async fn busy_conversation_is_rejected_under_reject_policy() {
    let mut config = AppConfig::default();
    config.chat.on_busy = BusyPolicy::Reject;
    let engine = ScriptedEngine::new(vec![Ok("Ferris"), Ok("Cargo")]).streaming(&["Ferris"], false);
    let chat = service(engine, &config).await;
    let id = ConversationId::new();
    let other = ConversationId::new();

    let _in_flight = chat.ask_streaming(&id, "first", None).await.unwrap();

    let err = chat.ask(&id, "second").await.unwrap_err();
    assert!(matches!(err, Error::ConversationBusy(_)));

    // Other conversations are unaffected.
    let reformulation = chat.reformulate(&other, "Package manager?").await.unwrap();
    assert_eq!(reformulation.text, "Cargo");
}

#[tokio::test]
async fn history_is_bounded_by_max_messages() {
    let mut config = AppConfig::default();
    config.conversation.max_messages = 4;
    let engine = ScriptedEngine::new(vec![Ok("r1"), Ok("a1"), Ok("r2"), Ok("a2")]);
    let chat = service(engine, &config).await;
    let id = ConversationId::new();

    chat.ask(&id, "q1").await.unwrap();
    chat.ask(&id, "q2").await.unwrap();

    let contents: Vec<_> = chat
        .store()
        .get(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, ["q2", "r2", "q2", "a2"]);
}
