//! Character ledgers: what we asked to have spoken, and what a session confirmed.

use std::ops::Range;
use std::sync::{Arc, RwLock};

/// Append-only record of every character the producer emitted.
///
/// Cloning yields another handle to the same ledger. The producer is the only
/// writer; the session manager reads it when resyncing. Never reset across
/// session retries.
#[derive(Debug, Clone, Default)]
pub struct SentLedger {
    chars: Arc<RwLock<Vec<char>>>,
}

impl SentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every character of `text` and returns the offset of the first one.
    pub fn append(&self, text: &str) -> usize {
        let mut chars = self.chars.write().unwrap_or_else(|e| e.into_inner());
        let offset = chars.len();
        chars.extend(text.chars());
        offset
    }

    pub fn len(&self) -> usize {
        self.chars.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies out `range`, clamped to the current length.
    pub fn slice(&self, range: Range<usize>) -> Vec<char> {
        let chars = self.chars.read().unwrap_or_else(|e| e.into_inner());
        let end = range.end.min(chars.len());
        let start = range.start.min(end);
        chars[start..end].to_vec()
    }

    /// Copies out the whole ledger.
    pub fn snapshot(&self) -> Vec<char> {
        self.chars.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Characters one session attempt confirmed as synthesized, in order.
///
/// Scoped to a single attempt: a fresh one is created for every connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceivedLedger {
    chars: Vec<String>,
}

impl ReceivedLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I>(&mut self, chars: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.chars.extend(chars);
    }

    pub fn chars(&self) -> &[String] {
        &self.chars
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}
