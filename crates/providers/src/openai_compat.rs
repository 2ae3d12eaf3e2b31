//! OpenAI-compatible completion engine.
//!
//! Works with: OpenAI, Azure OpenAI (via its v1-compatible endpoint),
//! OpenRouter, Ollama, vLLM, and any endpoint exposing
//! `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Usage reporting on the terminal stream fragment (`stream_options.include_usage`)
//! - Health checks

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use ragchat_core::error::ProviderError;
use ragchat_core::message::{Message, Role};
use ragchat_core::provider::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// An OpenAI-compatible completion engine.
pub struct OpenAiCompatEngine {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatEngine {
    /// Create a new OpenAI-compatible engine.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI engine (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama engine (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn post(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Engine returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

impl From<ApiUsage> for TokenUsage {
    fn from(u: ApiUsage) -> Self {
        TokenUsage::new(u.prompt_tokens, u.completion_tokens)
    }
}

#[async_trait]
impl CompletionEngine for OpenAiCompatEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let body = Self::request_body(&request, false);

        debug!(engine = %self.name, model = %request.model, "Sending completion request");

        let response = self.post(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let usage = api_response.usage.map(TokenUsage::from);
        let mut message = Message::assistant(choice.message.content.unwrap_or_default());
        message.usage = usage;

        Ok(Completion {
            message,
            usage,
            model: api_response.model,
        })
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentReceiver, ProviderError> {
        let body = Self::request_body(&request, true);

        debug!(engine = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&body, true).await?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(read_sse(response.bytes_stream(), tx, self.name.clone()));

        Ok(rx)
    }
}

// --- SSE parsing ---

/// Reader task: parse the SSE byte stream into fragments.
///
/// Returns as soon as the receiver is dropped, even while waiting on the
/// upstream, which drops the HTTP response with it. A body that ends before
/// a terminal chunk is reported as [`ProviderError::StreamInterrupted`].
async fn read_sse<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<Result<StreamFragment, ProviderError>>,
    engine_name: String,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut parser = SseParser::default();

    loop {
        let chunk_result = tokio::select! {
            biased;
            _ = tx.closed() => {
                trace!(engine = %engine_name, "Fragment receiver dropped");
                return;
            }
            chunk = byte_stream.next() => chunk,
        };
        let Some(chunk_result) = chunk_result else {
            break;
        };

        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        for event in parser.push(bytes) {
            match event {
                SseEvent::Fragment(fragment) => {
                    let terminal = fragment.done;
                    if tx.send(Ok(fragment)).await.is_err() {
                        trace!(engine = %engine_name, "Fragment receiver dropped");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
                SseEvent::Unparseable { data, error } => {
                    trace!(
                        engine = %engine_name,
                        data = %data,
                        error = %error,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }
    }

    warn!(engine = %engine_name, "Response body ended before the terminal chunk");
    let _ = tx
        .send(Err(ProviderError::StreamInterrupted(
            "response body ended before [DONE]".into(),
        )))
        .await;
}

enum SseEvent {
    Fragment(StreamFragment),
    Unparseable { data: String, error: String },
}

/// Incremental `text/event-stream` line parser.
///
/// Bytes may split lines, and UTF-8 characters, arbitrarily. Only complete
/// lines are decoded; the remainder is buffered for the next push.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, bytes: impl AsRef<[u8]>) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes.as_ref());
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]);
            let line = line.trim_end_matches('\r');

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            // "[DONE]" after the usage chunk is redundant; before it, the usage is unknown.
            if data == "[DONE]" {
                events.push(SseEvent::Fragment(StreamFragment::terminal(None)));
                continue;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    if let Some(content) = stream_resp
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        .filter(|c| !c.is_empty())
                    {
                        events.push(SseEvent::Fragment(StreamFragment::text(content)));
                    }

                    if let Some(usage) = stream_resp.usage {
                        events.push(SseEvent::Fragment(StreamFragment::terminal(Some(
                            usage.into(),
                        ))));
                    }
                }
                Err(e) => events.push(SseEvent::Unparseable {
                    data: data.to_string(),
                    error: e.to_string(),
                }),
            }
        }

        events
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragments(events: Vec<SseEvent>) -> Vec<StreamFragment> {
        events
            .into_iter()
            .filter_map(|e| match e {
                SseEvent::Fragment(f) => Some(f),
                SseEvent::Unparseable { .. } => None,
            })
            .collect()
    }

    #[test]
    fn openai_constructor() {
        let engine = OpenAiCompatEngine::openai("sk-test");
        assert_eq!(engine.name(), "openai");
        assert!(engine.base_url.contains("api.openai.com"));
    }

    #[test]
    fn ollama_constructor() {
        let engine = OpenAiCompatEngine::ollama(None);
        assert_eq!(engine.name(), "ollama");
        assert!(engine.base_url.contains("localhost:11434"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let engine = OpenAiCompatEngine::new("custom", "http://host/v1/", "k");
        assert_eq!(engine.base_url, "http://host/v1");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatEngine::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn streaming_body_requests_usage() {
        let request = CompletionRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            max_tokens: Some(800),
        };
        let body = OpenAiCompatEngine::request_body(&request, true);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 800);

        let batch = OpenAiCompatEngine::request_body(&request, false);
        assert!(batch.get("stream_options").is_none());
    }

    #[test]
    fn parse_content_deltas() {
        let mut parser = SseParser::default();
        let events = parser.push(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        );
        let frags = fragments(events);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].content.as_deref(), Some("Hel"));
        assert_eq!(frags[1].content.as_deref(), Some("lo"));
        assert!(!frags[1].done);
    }

    #[test]
    fn parse_line_split_across_pushes() {
        let mut parser = SseParser::default();
        assert!(parser.push("data: {\"choices\":[{\"delta\":{\"con").is_empty());
        let frags = fragments(parser.push("tent\":\"Hi\"}}]}\r\n"));
        assert_eq!(frags.len(), 1);
        assert_eq!(frags[0].content.as_deref(), Some("Hi"));
    }

    #[test]
    fn usage_chunk_is_terminal() {
        let mut parser = SseParser::default();
        let frags = fragments(parser.push(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n",
        ));
        assert_eq!(frags.len(), 1);
        assert!(frags[0].done);
        assert!(frags[0].content.is_none());
        assert_eq!(frags[0].usage, Some(TokenUsage::new(10, 5)));
    }

    #[test]
    fn empty_and_finish_deltas_produce_nothing() {
        let mut parser = SseParser::default();
        let events = parser.push(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":null}]}\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"\"},\"finish_reason\":\"stop\"}]}\n",
        );
        assert!(fragments(events).is_empty());
    }

    #[test]
    fn done_marker_is_terminal_without_usage() {
        let mut parser = SseParser::default();
        let frags = fragments(parser.push(": keep-alive\ndata: [DONE]\n"));
        assert_eq!(frags.len(), 1);
        assert!(frags[0].done);
        assert!(frags[0].usage.is_none());
    }

    #[test]
    fn garbage_is_reported_not_fatal() {
        let mut parser = SseParser::default();
        let events = parser.push("data: {oops\n");
        assert!(matches!(events.as_slice(), [SseEvent::Unparseable { .. }]));
    }

    #[test]
    fn multibyte_character_split_across_pushes() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        let mut parser = SseParser::default();
        assert!(parser.push(&line[..split]).is_empty());
        let frags = fragments(parser.push(&line[split..]));
        assert_eq!(frags[0].content.as_deref(), Some("caf\u{e9}"));
    }

    type Chunk = Result<&'static [u8], std::io::Error>;

    fn data(line: &'static str) -> Chunk {
        Ok(line.as_bytes())
    }

    async fn collect(chunks: Vec<Chunk>) -> Vec<Result<StreamFragment, ProviderError>> {
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(read_sse(futures::stream::iter(chunks), tx, "test".into()));
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn body_ending_early_is_an_interruption() {
        let items = collect(vec![data(
            "data: {\"choices\":[{\"delta\":{\"content\":\"The answer is\"}}]}\n\n",
        )])
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("The answer is"));
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn done_marker_ends_the_reader() {
        let items = collect(vec![
            data("data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n"),
            data("data: [DONE]\n"),
            data("data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n"),
        ])
        .await;

        assert_eq!(items.len(), 2);
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn transport_error_is_an_interruption() {
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let items = collect(vec![Err(reset)]).await;
        assert!(matches!(
            items.as_slice(),
            [Err(ProviderError::StreamInterrupted(msg))] if msg.contains("connection reset")
        ));
    }

    #[tokio::test]
    async fn stalled_upstream_stops_when_receiver_drops() {
        let first = data("data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n");
        let upstream = futures::stream::iter(vec![first]).chain(futures::stream::pending());
        let (tx, mut rx) = mpsc::channel(8);
        let reader = tokio::spawn(read_sse(upstream, tx, "test".into()));

        assert!(rx.recv().await.unwrap().is_ok());
        drop(rx);

        tokio::time::timeout(std::time::Duration::from_secs(2), reader)
            .await
            .expect("reader still waiting on the upstream")
            .unwrap();
    }

    #[test]
    fn parse_batch_response() {
        let data = r#"{
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": "Paris"}}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 1, "total_tokens": 21}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Paris"));
        let usage: TokenUsage = parsed.usage.unwrap().into();
        assert_eq!(usage, TokenUsage::new(20, 1));
    }
}
