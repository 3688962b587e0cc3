//! Chat completion token source.
//!
//! Streams a model's answer as server-sent events and yields each content
//! delta as one token.

use crate::config::{ApiKey, LlmConfig};
use crate::error::{Result, SpeakError};
use crate::source::TokenSource;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;

/// One decoded server-sent event line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A content fragment.
    Delta(String),
    /// The stream's `[DONE]` marker.
    Done,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Parses one line of the event stream. Comments, blank lines and events
/// without content yield `None`.
pub fn parse_sse_line(line: &str) -> Result<Option<SseEvent>> {
    let line = line.trim_end_matches('\r');
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let chunk: CompletionChunk = serde_json::from_str(data).map_err(|e| SpeakError::TokenSource {
        message: format!("invalid completion chunk: {e}"),
    })?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(SseEvent::Delta))
}

/// Splits a byte stream into lines, holding partial lines (and partial UTF-8
/// sequences) until their newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            if let Some(event) = parse_sse_line(&line)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Parses whatever is left once the stream ends.
    pub fn finish(&mut self) -> Result<Option<SseEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_sse_line(&String::from_utf8_lossy(&rest))
    }
}

/// Streams a chat completion for one prompt.
pub struct ChatCompletionSource {
    stream: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

impl ChatCompletionSource {
    /// Sends the request and waits for the response headers.
    pub async fn connect(config: &LlmConfig, api_key: &ApiKey, prompt: &str) -> Result<Self> {
        let body = json!({
            "model": config.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": config.temperature,
            "stream": true,
        });

        tracing::debug!(endpoint = %config.endpoint, model = %config.model, "requesting completion");
        let client = reqwest::Client::new();
        let response = client
            .post(&config.endpoint)
            .bearer_auth(api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| SpeakError::TokenSource {
                message: format!("failed to reach language model: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SpeakError::TokenSource {
                message: format!("language model returned status {status}: {}", detail.trim()),
            });
        }

        Ok(Self {
            stream: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        })
    }

    fn absorb(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Delta(text) => self.pending.push_back(text),
                SseEvent::Done => self.done = true,
            }
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for ChatCompletionSource {
    async fn next_token(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            if self.done {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| SpeakError::TokenSource {
                        message: format!("failed to read completion stream: {e}"),
                    })?;
                    let events = self.decoder.push(&chunk)?;
                    self.absorb(events);
                }
                None => {
                    let tail = self.decoder.finish()?;
                    self.absorb(tail.into_iter().collect());
                    self.done = true;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "chat-completion"
    }
}
