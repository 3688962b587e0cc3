//! Sender station: forwards chunks to the active session.

use crate::error::{Result, SpeakError, Stage};
use crate::session::protocol::OutboundMessage;
use crate::session::transport::OutboundChannel;
use crate::streaming::frame::ChunkFrame;
use tokio::sync::mpsc;

/// Drains the chunk queue into one session's write half.
///
/// No retries here; a failed send is returned to the session manager as is.
#[derive(Debug, Default)]
pub struct SenderStation {
    chunks_sent: u64,
    chars_sent: usize,
}

impl SenderStation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Characters submitted in this attempt.
    pub fn chars_sent(&self) -> usize {
        self.chars_sent
    }

    /// Runs until the end marker has been forwarded as an end-of-stream message.
    pub async fn run(
        &mut self,
        input: &mut mpsc::Receiver<ChunkFrame>,
        output: &mut dyn OutboundChannel,
    ) -> Result<()> {
        loop {
            match input.recv().await {
                Some(ChunkFrame::Chunk(text)) => {
                    let chars = text.chars().count();
                    output.send(&OutboundMessage::Text(text)).await?;
                    self.chunks_sent += 1;
                    self.chars_sent += chars;
                    tracing::trace!(chunk = self.chunks_sent, chars, "sent chunk");
                }
                Some(ChunkFrame::End) => {
                    output.send(&OutboundMessage::EndOfStream).await?;
                    tracing::debug!(
                        chunks = self.chunks_sent,
                        chars = self.chars_sent,
                        "sent end of stream"
                    );
                    return Ok(());
                }
                None => {
                    return Err(SpeakError::ChannelClosed {
                        stage: Stage::Chunker,
                    });
                }
            }
        }
    }
}
