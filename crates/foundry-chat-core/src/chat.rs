//! Streaming chat client for the backend's `POST /chat` route.
//!
//! The backend answers with `text/event-stream`: a run of `message` deltas, one
//! `completed_message` carrying the full text and its retrieval sources, then
//! `stream_end`. Sources become [`Annotation`]s so they can go straight into
//! [`group_annotations`](crate::group_annotations).

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotations::Annotation;
use crate::config::{BasicAuth, ClientConfig};
use crate::error::{ChatError, ChatResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Token accounting, when the backend reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// One turn of the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub annotations: Vec<Annotation>,
    pub usage_info: Option<UsageInfo>,
    /// Wall-clock time from request to end of stream (assistant messages only).
    pub duration: Option<Duration>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::User,
            content: content.into(),
            annotations: Vec::new(),
            usage_info: None,
            duration: None,
        }
    }
}

/// A retrieval hit attached to `completed_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub document: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub chunk_index: Option<i64>,
    #[serde(default)]
    pub page_number: Option<i64>,
}

impl From<Source> for Annotation {
    fn from(source: Source) -> Self {
        Annotation {
            file_name: source.document,
            text: None,
            url: source.url,
            page_number: source.page_number,
        }
    }
}

/// One decoded `data:` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Message {
        content: String,
    },
    CompletedMessage {
        content: String,
        #[serde(default)]
        sources: Option<Vec<Source>>,
        #[serde(default)]
        usage: Option<UsageInfo>,
    },
    StreamEnd,
}

impl StreamEvent {
    /// Parse a payload; unknown event types and malformed JSON yield `None`.
    pub fn parse(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::debug!(target: "foundry_chat::chat", "Skipping stream payload ({}): {}", e, payload);
                None
            }
        }
    }
}

/// Incremental server-sent-events decoder.
///
/// Bytes may be split anywhere (mid-line, mid-UTF-8 sequence); only complete
/// events are returned. Multiple `data:` lines in one event are joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the data payloads of every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.push_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush whatever is left once the body ends without a trailing blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(event) = self.push_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn push_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // comments (":") and other fields (event/id/retry) are not used by the backend
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

/// Assembles the assistant reply from stream events.
#[derive(Debug, Default)]
pub struct ChatTranscript {
    content: String,
    annotations: Vec<Annotation>,
    usage: Option<UsageInfo>,
    completed: bool,
    ended: bool,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event; returns the text delta for `message` events.
    pub fn apply(&mut self, event: StreamEvent) -> Option<String> {
        match event {
            StreamEvent::Message { content } => {
                self.content.push_str(&content);
                Some(content)
            }
            StreamEvent::CompletedMessage {
                content,
                sources,
                usage,
            } => {
                self.content = content;
                self.annotations = sources
                    .unwrap_or_default()
                    .into_iter()
                    .map(Annotation::from)
                    .collect();
                self.usage = usage;
                self.completed = true;
                None
            }
            StreamEvent::StreamEnd => {
                self.ended = true;
                None
            }
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// True once a `completed_message` arrived.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// True once `stream_end` arrived.
    pub fn is_finished(&self) -> bool {
        self.ended
    }

    pub fn into_message(self, duration: Option<Duration>) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            role: ChatRole::Assistant,
            content: self.content,
            annotations: self.annotations,
            usage_info: self.usage,
            duration,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: ChatRole,
    content: &'a str,
}

/// Client for `POST {base}/chat`.
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    auth: Option<BasicAuth>,
}

impl ChatClient {
    pub fn new(config: &ClientConfig) -> ChatResult<Self> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: config.endpoint("/chat"),
            auth: config.basic_auth.clone(),
        })
    }

    /// Send the conversation and wait for the full assistant reply.
    pub async fn send(&self, history: &[ChatMessage]) -> ChatResult<ChatMessage> {
        self.send_with(history, |_| {}).await
    }

    /// Like [`send`](Self::send), calling `on_delta` for every streamed text fragment.
    pub async fn send_with<F>(&self, history: &[ChatMessage], mut on_delta: F) -> ChatResult<ChatMessage>
    where
        F: FnMut(&str),
    {
        let started = Instant::now();
        let body = ChatRequest {
            messages: history
                .iter()
                .map(|m| WireMessage {
                    role: m.role,
                    content: &m.content,
                })
                .collect(),
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        let res = request.send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        let mut decoder = SseDecoder::new();
        let mut transcript = ChatTranscript::new();
        let mut stream = res.bytes_stream();
        'read: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for payload in decoder.feed(&chunk) {
                if let Some(event) = StreamEvent::parse(&payload) {
                    if let Some(delta) = transcript.apply(event) {
                        on_delta(&delta);
                    }
                }
                if transcript.is_finished() {
                    break 'read;
                }
            }
        }
        if !transcript.is_finished() {
            if let Some(event) = decoder.finish().as_deref().and_then(StreamEvent::parse) {
                if let Some(delta) = transcript.apply(event) {
                    on_delta(&delta);
                }
            }
        }

        if !transcript.is_completed() {
            if transcript.content().is_empty() {
                return Err(ChatError::Decode(
                    "stream closed before any message arrived".to_string(),
                ));
            }
            tracing::warn!(target: "foundry_chat::chat", "Stream closed without completed_message; keeping streamed text.");
        }
        let elapsed = started.elapsed();
        tracing::debug!(target: "foundry_chat::chat", "Chat reply finished in {:?}.", elapsed);
        Ok(transcript.into_message(Some(elapsed)))
    }
}
