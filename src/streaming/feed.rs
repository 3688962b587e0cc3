//! Chunker input that survives session retries.
//!
//! The producer's queue outlives any single session attempt. After a drop the
//! unconfirmed text is replayed first, and queued tokens whose characters are
//! already covered by that replay are skipped.

use crate::streaming::frame::{TextFrame, TextToken};
use std::collections::VecDeque;
use tokio::sync::mpsc;

pub struct TokenFeed {
    replay: VecDeque<TextFrame>,
    rx: mpsc::Receiver<TextFrame>,
    /// Tokens ending at or below this ledger offset were already replayed.
    skip_below: usize,
    ended: bool,
}

impl TokenFeed {
    pub fn new(rx: mpsc::Receiver<TextFrame>) -> Self {
        Self {
            replay: VecDeque::new(),
            rx,
            skip_below: 0,
            ended: false,
        }
    }

    /// Returns the next frame, waiting on the producer when nothing is buffered.
    ///
    /// Cancel-safe: a frame is only removed once it is returned. A producer that
    /// disappears without sending `End` is treated as having ended.
    pub async fn next(&mut self) -> TextFrame {
        if let Some(frame) = self.replay.pop_front() {
            return frame;
        }
        if self.ended {
            return TextFrame::End;
        }

        loop {
            match self.rx.recv().await {
                Some(TextFrame::Token(token)) => {
                    if let Some(token) = self.trim_replayed(token) {
                        return TextFrame::Token(token);
                    }
                }
                Some(TextFrame::End) | None => {
                    self.ended = true;
                    return TextFrame::End;
                }
            }
        }
    }

    /// Restarts the feed from `remaining`, which starts at ledger `offset` and
    /// covers the ledger up to `ledger_len`.
    pub fn reseed(&mut self, remaining: String, offset: usize, ledger_len: usize) {
        self.replay.clear();
        if !remaining.is_empty() {
            self.replay
                .push_back(TextFrame::Token(TextToken::new(remaining, offset)));
        }
        self.skip_below = self.skip_below.max(ledger_len);
    }

    /// True once the producer's end marker (or disconnect) has been seen.
    pub fn producer_ended(&self) -> bool {
        self.ended
    }

    fn trim_replayed(&self, token: TextToken) -> Option<TextToken> {
        if token.offset >= self.skip_below {
            return Some(token);
        }
        if token.end_offset() <= self.skip_below {
            tracing::trace!(offset = token.offset, "skipping token already replayed");
            return None;
        }
        let covered = self.skip_below - token.offset;
        let tail: String = token.text.chars().skip(covered).collect();
        Some(TextToken::new(tail, self.skip_below))
    }
}
