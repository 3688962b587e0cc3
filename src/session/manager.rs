//! Session manager: runs the pipeline against one session at a time and
//! resumes from the unconfirmed text when a session drops.

use crate::config::{ApiKey, Config};
use crate::error::{Result, SpeakError, Stage};
use crate::ledger::{ReceivedLedger, SentLedger};
use crate::resync::ResyncMatcher;
use crate::session::protocol::{OutboundMessage, VoiceSettings};
use crate::session::state::{CloseKind, SessionState, StateTracker};
use crate::session::transport::{SessionChannels, SessionConnector};
use crate::streaming::chunker::ChunkerStation;
use crate::streaming::feed::TokenFeed;
use crate::streaming::listener::ListenerStation;
use crate::streaming::sender::SenderStation;
use crate::streaming::sink::{AudioOutput, SinkStation};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

/// Everything the manager needs to open and run sessions.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub voice_settings: VoiceSettings,
    pub api_key: ApiKey,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub displacement_tolerance: usize,
    pub channel_buffer_size: usize,
    pub attempt_timeout: Option<Duration>,
}

impl SessionSettings {
    pub fn from_config(config: &Config, api_key: ApiKey) -> Self {
        Self {
            voice_settings: VoiceSettings::from(&config.synthesis),
            api_key,
            max_attempts: config.session.max_attempts,
            displacement_tolerance: config.session.displacement_tolerance,
            channel_buffer_size: config.session.channel_buffer_size,
            attempt_timeout: config.session.attempt_timeout(),
        }
    }
}

/// Lets a caller tear down the active session from outside.
///
/// A teardown takes the same path as a network drop: the session is closed,
/// the ledgers are reconciled and a new session resumes the remaining text.
/// A request made between attempts applies to the next one.
#[derive(Debug, Clone, Default)]
pub struct TeardownHandle {
    notify: Arc<Notify>,
}

impl TeardownHandle {
    pub fn tear_down(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// Lets a caller stop the whole request, e.g. on Ctrl-C.
///
/// The active session is closed without a retry, the audio output is
/// released and the manager returns [`SpeakError::Interrupted`].
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.notify.notify_one();
    }

    async fn requested(&self) {
        self.notify.notified().await;
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Completed,
    Dropped { reason: String },
}

/// Per-attempt bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub attempt: u32,
    /// Sent ledger offset this attempt started speaking from.
    pub resumed_at: usize,
    /// Characters the service confirmed, including its leading artifact.
    pub confirmed_chars: usize,
    pub audio_bytes: usize,
    pub outcome: AttemptOutcome,
}

/// Summary of a request that completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub attempts: Vec<AttemptReport>,
    pub states: Vec<SessionState>,
    /// Sent ledger length at completion.
    pub chars_sent: usize,
    pub bytes_played: usize,
}

impl SessionReport {
    pub fn retries(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }
}

/// Owns the connector and the audio output, and drives the retry loop.
pub struct SessionManager {
    connector: Box<dyn SessionConnector>,
    output: Box<dyn AudioOutput>,
    settings: SessionSettings,
    matcher: ResyncMatcher,
    teardown: TeardownHandle,
    interrupt: InterruptHandle,
}

impl SessionManager {
    pub fn new(
        connector: Box<dyn SessionConnector>,
        output: Box<dyn AudioOutput>,
        settings: SessionSettings,
    ) -> Self {
        let matcher = ResyncMatcher::new(settings.displacement_tolerance);
        Self {
            connector,
            output,
            settings,
            matcher,
            teardown: TeardownHandle::default(),
            interrupt: InterruptHandle::default(),
        }
    }

    pub fn teardown_handle(&self) -> TeardownHandle {
        self.teardown.clone()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Speaks everything the feed yields, retrying dropped sessions.
    ///
    /// `ledger` must be the ledger the feed's producer appends to. On return,
    /// successful or not, the audio output has been released.
    pub async fn run(&mut self, feed: &mut TokenFeed, ledger: &SentLedger) -> Result<SessionReport> {
        let mut tracker = StateTracker::new();
        let mut sink = SinkStation::new();
        let mut attempts = Vec::new();
        // Sent ledger offset the current session's text starts at.
        let mut base = 0;
        let mut attempt = 1;

        loop {
            tracker.transition(SessionState::Connecting { attempt });
            let opened = tokio::select! {
                biased;
                _ = self.interrupt.requested() => Err(SpeakError::Interrupted),
                opened = self.open_session() => opened,
            };
            let channels = match opened {
                Ok(channels) => channels,
                Err(e) => {
                    tracing::error!(attempt, error = %e, "failed to open synthesis session");
                    self.release_output().await;
                    tracker.transition(SessionState::Closed(close_kind(&e)));
                    return Err(e);
                }
            };

            tracker.transition(SessionState::Streaming { attempt });
            tracing::info!(attempt, resumed_at = base, "session streaming");
            let mut received = ReceivedLedger::new();
            let (result, audio_bytes) = self
                .stream(feed, channels, &mut received, &mut sink)
                .await;

            let error = match result {
                Ok(()) => {
                    attempts.push(AttemptReport {
                        attempt,
                        resumed_at: base,
                        confirmed_chars: received.len(),
                        audio_bytes,
                        outcome: AttemptOutcome::Completed,
                    });
                    tracker.transition(SessionState::Closed(CloseKind::Clean));
                    tracing::info!(attempts = attempt, chars = ledger.len(), "request complete");
                    return Ok(SessionReport {
                        attempts,
                        states: tracker.into_history(),
                        chars_sent: ledger.len(),
                        bytes_played: sink.bytes_written(),
                    });
                }
                Err(e) if e.is_recoverable() => e,
                Err(SpeakError::Interrupted) => {
                    tracing::info!(attempt, confirmed = received.len(), "interrupted, stopping playback");
                    self.release_output().await;
                    tracker.transition(SessionState::Closed(CloseKind::Interrupted));
                    return Err(SpeakError::Interrupted);
                }
                Err(e) => {
                    tracing::error!(attempt, error = %e, "session failed");
                    self.release_output().await;
                    tracker.transition(SessionState::Closed(CloseKind::Fatal));
                    return Err(e);
                }
            };

            tracker.transition(SessionState::Dropped { attempt });
            tracing::warn!(
                attempt,
                error = %error,
                confirmed = received.len(),
                "session dropped"
            );
            attempts.push(AttemptReport {
                attempt,
                resumed_at: base,
                confirmed_chars: received.len(),
                audio_bytes,
                outcome: AttemptOutcome::Dropped {
                    reason: error.to_string(),
                },
            });

            tracker.transition(SessionState::Resyncing { attempt });
            let ledger_len = ledger.len();
            let sent = ledger.slice(base..ledger_len);
            let resync = match self.matcher.resync(&sent, received.chars()) {
                Ok(resync) => resync,
                Err(detail) => {
                    tracing::error!(%detail, "could not align confirmed text with sent text");
                    tracker.transition(SessionState::Closed(CloseKind::Fatal));
                    return Err(SpeakError::from(detail).in_stage(Stage::Resync));
                }
            };
            let resume_at = base + resync.resume_at;
            tracing::info!(
                resume_at,
                ledger_len,
                remaining = resync.remaining.chars().count(),
                displacements = resync.displacements,
                "resynced"
            );

            if resync.is_complete() && feed.producer_ended() {
                tracker.transition(SessionState::Closed(CloseKind::Clean));
                tracing::info!(attempts = attempt, "everything confirmed before the drop");
                return Ok(SessionReport {
                    attempts,
                    states: tracker.into_history(),
                    chars_sent: ledger.len(),
                    bytes_played: sink.bytes_written(),
                });
            }

            if attempt >= self.settings.max_attempts {
                tracing::error!(attempts = attempt, "giving up on dropped sessions");
                tracker.transition(SessionState::Closed(CloseKind::Fatal));
                return Err(SpeakError::RetriesExhausted { attempts: attempt });
            }

            feed.reseed(resync.remaining, resume_at, ledger_len);
            base = resume_at;
            attempt += 1;
        }
    }

    /// Connects and sends the init message.
    async fn open_session(&self) -> Result<SessionChannels> {
        let mut channels = self
            .connector
            .connect()
            .await
            .map_err(|e| e.in_stage(Stage::Connect))?;
        let init = OutboundMessage::Init {
            voice_settings: self.settings.voice_settings,
            api_key: self.settings.api_key.clone(),
        };
        channels
            .outbound
            .send(&init)
            .await
            .map_err(|e| e.in_stage(Stage::Connect))?;
        Ok(channels)
    }

    /// Runs the four stations against one session.
    ///
    /// Returns the attempt's result and the audio bytes the listener received.
    /// After a drop, audio already queued for the sink is played and the output
    /// is released before returning.
    async fn stream(
        &mut self,
        feed: &mut TokenFeed,
        channels: SessionChannels,
        received: &mut ReceivedLedger,
        sink: &mut SinkStation,
    ) -> (Result<()>, usize) {
        let SessionChannels {
            mut outbound,
            mut inbound,
        } = channels;
        let (chunk_tx, mut chunk_rx) = mpsc::channel(self.settings.channel_buffer_size);
        let (audio_tx, mut audio_rx) = mpsc::channel(self.settings.channel_buffer_size);
        let mut chunker = ChunkerStation::new();
        let mut sender = SenderStation::new();
        let mut listener = ListenerStation::new();
        let timeout = self.settings.attempt_timeout;

        let result = {
            let output = self.output.as_mut();
            let pipeline = async {
                tokio::try_join!(
                    async {
                        chunker
                            .run(feed, &chunk_tx)
                            .await
                            .map_err(|e| e.in_stage(Stage::Chunker))
                    },
                    async {
                        sender
                            .run(&mut chunk_rx, outbound.as_mut())
                            .await
                            .map_err(|e| e.in_stage(Stage::Sender))
                    },
                    async {
                        listener
                            .run(inbound.as_mut(), &audio_tx, received)
                            .await
                            .map_err(|e| e.in_stage(Stage::Listener))
                    },
                    async {
                        sink.run(&mut audio_rx, output)
                            .await
                            .map_err(|e| e.in_stage(Stage::Sink))
                    },
                )
                .map(|_| ())
            };

            tokio::select! {
                result = pipeline => result,
                _ = self.teardown.requested() => Err(SpeakError::SessionDropped {
                    reason: "session torn down by caller".to_string(),
                }),
                _ = self.interrupt.requested() => Err(SpeakError::Interrupted),
                _ = deadline(timeout) => Err(SpeakError::SessionDropped {
                    reason: format!("attempt exceeded {:?}", timeout.unwrap_or_default()),
                }),
            }
        };

        if let Err(e) = outbound.close().await {
            tracing::debug!(error = %e, "closing session");
        }

        let result = match result {
            Err(e) if e.is_recoverable() => {
                match sink.drain(&mut audio_rx, self.output.as_mut()).await {
                    Ok(()) => {
                        self.release_output().await;
                        Err(e)
                    }
                    Err(drain_error) => Err(drain_error.in_stage(Stage::Sink)),
                }
            }
            other => other,
        };

        (result, listener.audio_bytes())
    }

    /// Stops the audio output; failures are logged, the output is gone either way.
    async fn release_output(&mut self) {
        if let Err(e) = self.output.release().await {
            tracing::warn!(output = self.output.name(), error = %e, "failed to release audio output");
        }
    }
}

fn close_kind(error: &SpeakError) -> CloseKind {
    match error {
        SpeakError::Interrupted => CloseKind::Interrupted,
        _ => CloseKind::Fatal,
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}
