//! Listener station: demultiplexes session output into audio and alignment.

use crate::error::{Result, SpeakError, Stage};
use crate::ledger::ReceivedLedger;
use crate::session::transport::InboundChannel;
use crate::streaming::frame::AudioFrame;
use tokio::sync::mpsc;

/// Reads one session's messages until the final flag.
#[derive(Debug, Default)]
pub struct ListenerStation {
    messages: u64,
    audio_bytes: usize,
}

impl ListenerStation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audio_bytes(&self) -> usize {
        self.audio_bytes
    }

    /// Runs until the service marks the session final.
    ///
    /// Audio is forwarded to the sink queue; confirmed characters are appended
    /// to `received` in order. A final message yields the audio end marker.
    /// Errors from the session, including drops, are returned unchanged.
    pub async fn run(
        &mut self,
        input: &mut dyn InboundChannel,
        output: &mpsc::Sender<AudioFrame>,
        received: &mut ReceivedLedger,
    ) -> Result<()> {
        loop {
            let message = input.recv().await?;
            self.messages += 1;

            if let Some(audio) = message.audio {
                self.audio_bytes += audio.len();
                send(output, AudioFrame::Audio(audio)).await?;
            }

            if !message.chars.is_empty() {
                tracing::trace!(
                    chars = message.chars.len(),
                    total = received.len() + message.chars.len(),
                    "alignment confirmed"
                );
                received.extend(message.chars);
            }

            if message.is_final {
                tracing::debug!(
                    messages = self.messages,
                    audio_bytes = self.audio_bytes,
                    confirmed = received.len(),
                    "session reported final"
                );
                send(output, AudioFrame::End).await?;
                return Ok(());
            }
        }
    }
}

async fn send(output: &mpsc::Sender<AudioFrame>, frame: AudioFrame) -> Result<()> {
    output
        .send(frame)
        .await
        .map_err(|_| SpeakError::ChannelClosed { stage: Stage::Sink })
}
