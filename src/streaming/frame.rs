//! Frame types for the streaming pipeline.
//!
//! Every queue between stations carries an explicit end-of-stream variant,
//! so an empty string or an empty audio buffer is never mistaken for the end.

/// A text fragment from the upstream producer, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextToken {
    /// The fragment itself.
    pub text: String,
    /// Character offset of the fragment's first character in the sent ledger.
    pub offset: usize,
}

impl TextToken {
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        Self {
            text: text.into(),
            offset,
        }
    }

    /// Ledger offset one past the last character of this token.
    pub fn end_offset(&self) -> usize {
        self.offset + self.text.chars().count()
    }
}

/// Input to the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFrame {
    Token(TextToken),
    End,
}

/// Output of the chunker, input to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkFrame {
    /// Boundary-safe text, terminated with a single space.
    Chunk(String),
    End,
}

impl ChunkFrame {
    /// Returns the chunk text, or `None` for the end marker.
    pub fn text(&self) -> Option<&str> {
        match self {
            ChunkFrame::Chunk(text) => Some(text),
            ChunkFrame::End => None,
        }
    }
}

/// Output of the listener, input to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFrame {
    /// Decoded audio bytes, written verbatim to the player.
    Audio(Vec<u8>),
    End,
}

impl AudioFrame {
    pub fn is_end(&self) -> bool {
        matches!(self, AudioFrame::End)
    }
}
