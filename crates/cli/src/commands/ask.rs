//! `ragchat ask` — Single-question or interactive chat over a document folder.

use anyhow::Context;
use futures::StreamExt;
use ragchat_chat::{AnswerEvent, ChatService};
use ragchat_config::AppConfig;
use ragchat_core::{ConversationId, Error};
use ragchat_memory::{ConversationStore, InMemoryCache, KeywordChunkSource};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub async fn run(
    question: Option<String>,
    conversation: Option<String>,
    stream: bool,
    docs: PathBuf,
) -> anyhow::Result<()> {
    let config = AppConfig::load().context("Failed to load config")?;

    let engine = ragchat_providers::build_engine(&config).with_context(|| {
        format!(
            "Set RAGCHAT_API_KEY or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        )
    })?;
    let counter = ragchat_providers::build_token_counter(&config)?;

    let source = load_documents(&docs).await?;
    let documents = source.len().await;
    info!(documents, folder = %docs.display(), "Documents indexed");

    let store = ConversationStore::new(
        Arc::new(InMemoryCache::new()),
        config.conversation.max_messages,
        config.conversation.expiration(),
    );
    let chat = ChatService::new(&config, store, engine, counter, Arc::new(source));
    let id = conversation.map(ConversationId::from).unwrap_or_default();

    if let Some(question) = question {
        return answer(&chat, &id, &question, stream).await;
    }

    // Interactive mode
    println!();
    println!("  ragchat — Interactive Mode");
    println!();
    println!("  Engine:        {}", config.provider.name);
    println!("  Model:         {}", config.provider.model);
    println!("  Documents:     {}", docs.display());
    println!("  Conversation:  {id}");
    println!();
    println!("  Type your question and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        print!("  Assistant > ");
        std::io::stdout().flush()?;
        if let Err(e) = answer(&chat, &id, line, stream).await {
            println!();
            eprintln!("  Error: {e:#}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

async fn answer(chat: &ChatService, id: &ConversationId, question: &str, stream: bool) -> anyhow::Result<()> {
    if !stream {
        let response = chat.ask(id, question).await?;
        println!("{}", response.answer);
        debug!(
            reformulated = %response.reformulated_question,
            included = response.included_chunks,
            truncated = response.truncated,
            "Exchange stats"
        );
        eprintln!(
            "  [{} chunks, {} tokens]",
            response.included_chunks,
            response.usage.total()
        );
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = print_stream(chat, id, question, cancel).await;
    watcher.abort();
    result
}

async fn print_stream(
    chat: &ChatService,
    id: &ConversationId,
    question: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut events = match chat.ask_streaming(id, question, Some(cancel)).await {
        Ok(events) => events,
        Err(Error::Cancelled) => {
            eprintln!("  [cancelled]");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let included = events.included_chunks();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        match event {
            Ok(AnswerEvent::Fragment { content }) => {
                write!(stdout, "{content}")?;
                stdout.flush()?;
            }
            Ok(AnswerEvent::Usage { usage }) => {
                writeln!(stdout)?;
                eprintln!("  [{included} chunks, {} tokens]", usage.total());
            }
            Err(Error::Cancelled) => {
                writeln!(stdout)?;
                eprintln!("  [cancelled]");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Index every `.txt` / `.md` file under `folder`, one document per paragraph.
async fn load_documents(folder: &Path) -> anyhow::Result<KeywordChunkSource> {
    let source = KeywordChunkSource::new();
    let mut pending = vec![folder.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            if !is_document(&path) {
                continue;
            }

            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let label = path.display().to_string();
            for paragraph in split_paragraphs(&text) {
                source.add(paragraph, Some(label.clone())).await;
            }
        }
    }

    Ok(source)
}

fn is_document(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("txt") | Some("md")
    )
}

/// Split text on blank lines, dropping empty paragraphs.
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    paragraphs
}
