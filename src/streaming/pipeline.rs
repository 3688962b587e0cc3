//! Speech pipeline orchestrator.
//!
//! Runs the upstream producer and the session manager side by side:
//! Source → Sent Ledger + Token Queue → Session Manager (Chunker → Sender →
//! Session → Listener → Sink).

use crate::error::{Result, Stage};
use crate::ledger::SentLedger;
use crate::session::manager::{InterruptHandle, SessionManager, SessionReport, TeardownHandle};
use crate::source::TokenSource;
use crate::streaming::feed::TokenFeed;
use crate::streaming::frame::{TextFrame, TextToken};
use tokio::sync::mpsc;

/// Speaks everything a [`TokenSource`] produces.
pub struct SpeechPipeline {
    manager: SessionManager,
    channel_buffer_size: usize,
    ledger: SentLedger,
}

impl SpeechPipeline {
    pub fn new(manager: SessionManager, channel_buffer_size: usize) -> Self {
        Self {
            manager,
            channel_buffer_size: channel_buffer_size.max(1),
            ledger: SentLedger::new(),
        }
    }

    /// Handle to the sent ledger, readable while and after the pipeline runs.
    pub fn ledger(&self) -> SentLedger {
        self.ledger.clone()
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        self.manager.teardown_handle()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.manager.interrupt_handle()
    }

    /// Runs until the source is exhausted and all of its text was spoken.
    ///
    /// A source error stops production; text produced before it is still
    /// spoken, then the source error is returned.
    pub async fn run(mut self, source: &mut dyn TokenSource) -> Result<SessionReport> {
        let (token_tx, token_rx) = mpsc::channel(self.channel_buffer_size);
        let ledger = self.ledger.clone();
        let manager = &mut self.manager;

        let speak = async move {
            let mut feed = TokenFeed::new(token_rx);
            let result = manager.run(&mut feed, &ledger).await;
            // Closing the queue stops the producer.
            drop(feed);
            result
        };

        let (produced, spoken) = tokio::join!(produce(source, &self.ledger, token_tx), speak);

        produced.map_err(|e| e.in_stage(Stage::Producer))?;
        spoken
    }
}

/// Appends each token to the ledger, then queues it with its ledger offset.
///
/// Stops quietly once the consumer is gone.
async fn produce(
    source: &mut dyn TokenSource,
    ledger: &SentLedger,
    output: mpsc::Sender<TextFrame>,
) -> Result<()> {
    let mut tokens = 0u64;
    loop {
        let next = tokio::select! {
            next = source.next_token() => next?,
            _ = output.closed() => {
                tracing::debug!(source = source.name(), "consumer finished, stopping producer");
                return Ok(());
            }
        };

        let Some(token) = next else {
            break;
        };
        if token.is_empty() {
            continue;
        }

        let offset = ledger.append(&token);
        tokens += 1;
        if output
            .send(TextFrame::Token(TextToken::new(token, offset)))
            .await
            .is_err()
        {
            return Ok(());
        }
    }

    tracing::debug!(source = source.name(), tokens, chars = ledger.len(), "source exhausted");
    if output.send(TextFrame::End).await.is_err() {
        tracing::debug!("consumer gone before end of input");
    }
    Ok(())
}
