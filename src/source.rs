//! Upstream text producers.

use crate::error::{Result, SpeakError};
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Pluggable producer of text fragments, in order.
#[async_trait::async_trait]
pub trait TokenSource: Send {
    /// Waits for the next fragment. `None` means the text is complete.
    async fn next_token(&mut self) -> Result<Option<String>>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "source"
    }
}

/// Yields a fixed list of tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    tokens: VecDeque<String>,
}

impl StaticSource {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits text into word-sized tokens the way a model would stream it:
    /// each token carries its leading whitespace.
    pub fn from_text(text: &str) -> Self {
        let mut tokens = Vec::new();
        let mut start = 0;
        for (idx, c) in text.char_indices() {
            if c.is_whitespace() && idx > start && !text[start..idx].trim().is_empty() {
                tokens.push(text[start..idx].to_string());
                start = idx;
            }
        }
        if start < text.len() {
            tokens.push(text[start..].to_string());
        }
        Self::new(tokens)
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticSource {
    async fn next_token(&mut self) -> Result<Option<String>> {
        Ok(self.tokens.pop_front())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Streams lines from a reader, keeping line breaks.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R> ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait::async_trait]
impl<R> TokenSource for ReaderSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_token(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| SpeakError::TokenSource {
                message: format!("failed to read input: {e}"),
            })?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn name(&self) -> &'static str {
        "reader"
    }
}
