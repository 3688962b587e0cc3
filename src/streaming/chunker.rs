//! Chunker station for the streaming pipeline.
//!
//! Buffers raw model tokens and emits chunks that never split a sentence or
//! clause boundary:
//! - If the buffer already ends on a boundary, it is flushed and the incoming
//!   token starts a new buffer.
//! - If the incoming token starts with a boundary, the buffer plus that one
//!   character is flushed and the rest of the token is buffered.
//! - Otherwise the token is appended.
//!
//! Each chunk carries exactly one trailing space. Whitespace at a seam is
//! folded into that space, so chunks never start with whitespace and a
//! whitespace-only chunk is never emitted.

use crate::error::{Result, SpeakError, Stage};
use crate::streaming::feed::TokenFeed;
use crate::streaming::frame::{ChunkFrame, TextFrame};
use tokio::sync::mpsc;

/// Characters a chunk may end on.
pub const BOUNDARY_CHARS: &[char] = &[
    '.', ',', '?', '!', ';', ':', '—', '-', '(', ')', '[', ']', '}', ' ',
];

fn is_boundary(c: char) -> bool {
    BOUNDARY_CHARS.contains(&c)
}

/// Chunker that accumulates tokens and emits boundary-safe chunks.
#[derive(Debug, Default)]
pub struct ChunkerStation {
    buffer: String,
    chunks_emitted: u64,
}

impl ChunkerStation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text buffered but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    /// Feeds one token and returns a chunk if one became complete.
    pub fn process(&mut self, token: &str) -> Option<String> {
        if token.is_empty() {
            return None;
        }

        if self.buffer.ends_with(is_boundary) {
            let body = std::mem::replace(&mut self.buffer, token.to_string());
            return self.seal(&body);
        }

        let mut rest = token.chars();
        if let Some(first) = rest.next()
            && is_boundary(first)
        {
            let mut body = std::mem::replace(&mut self.buffer, rest.as_str().to_string());
            body.push(first);
            return self.seal(&body);
        }

        self.buffer.push_str(token);
        None
    }

    /// Flushes whatever is left at end of input.
    pub fn finish(&mut self) -> Option<String> {
        let body = std::mem::take(&mut self.buffer);
        self.seal(&body)
    }

    fn seal(&mut self, body: &str) -> Option<String> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        self.chunks_emitted += 1;
        Some(format!("{body} "))
    }

    /// Runs the chunker as a station.
    ///
    /// Returns after forwarding the end marker. Waits cooperatively on the feed
    /// and on back-pressure from the sender.
    pub async fn run(&mut self, input: &mut TokenFeed, output: &mpsc::Sender<ChunkFrame>) -> Result<()> {
        loop {
            match input.next().await {
                TextFrame::Token(token) => {
                    tracing::trace!(text = %token.text, offset = token.offset, "chunker received token");
                    if let Some(chunk) = self.process(&token.text) {
                        send(output, ChunkFrame::Chunk(chunk)).await?;
                    }
                }
                TextFrame::End => {
                    if let Some(chunk) = self.finish() {
                        send(output, ChunkFrame::Chunk(chunk)).await?;
                    }
                    tracing::debug!(chunks = self.chunks_emitted, "chunker reached end of input");
                    send(output, ChunkFrame::End).await?;
                    return Ok(());
                }
            }
        }
    }
}

async fn send(output: &mpsc::Sender<ChunkFrame>, frame: ChunkFrame) -> Result<()> {
    output
        .send(frame)
        .await
        .map_err(|_| SpeakError::ChannelClosed {
            stage: Stage::Sender,
        })
}

/// Runs a whole token sequence through a fresh chunker.
pub fn chunk_all<'a, I>(tokens: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut chunker = ChunkerStation::new();
    let mut chunks: Vec<String> = tokens
        .into_iter()
        .filter_map(|token| chunker.process(token))
        .collect();
    chunks.extend(chunker.finish());
    chunks
}
