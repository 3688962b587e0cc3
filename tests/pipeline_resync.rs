//! End-to-end runs of the speech pipeline against a scripted synthesis service.
//!
//! The service confirms every character it is sent and answers each one with
//! that character's bytes as "audio", so the collected audio spells out what
//! was spoken. Sessions can be scripted to drop, stall or misreport alignment.

use speakstream::config::ApiKey;
use speakstream::error::{SpeakError, Stage};
use speakstream::session::manager::{AttemptOutcome, SessionManager, SessionSettings};
use speakstream::session::protocol::{InboundMessage, OutboundMessage, VoiceSettings};
use speakstream::session::state::{CloseKind, SessionState};
use speakstream::session::transport::{
    InboundChannel, OutboundChannel, SessionChannels, SessionConnector,
};
use speakstream::source::{StaticSource, TokenSource};
use speakstream::streaming::pipeline::SpeechPipeline;
use speakstream::streaming::sink::{CollectedAudio, CollectorOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const TEXT: &str = "The quick brown fox jumps over the lazy dog. \
Pack my box with five dozen liquor jugs! How vexingly quick daft zebras jump?";

/// What one scripted session does.
#[derive(Debug, Clone, Copy)]
enum Plan {
    /// Confirms everything and finishes.
    Complete,
    /// Confirms `n` characters, then the connection resets.
    DropAfter(usize),
    /// Confirms `n` characters, then goes silent.
    StallAfter(usize),
    /// Reports `noise` ahead of the real characters, then drops after `n`.
    Garbled { noise: &'static str, drop_after: usize },
    /// Rejects the first chunk with a service error.
    ServiceError,
    /// Refuses the connection.
    Refuse,
}

#[derive(Debug)]
enum Wire {
    Text(String),
    End,
}

#[derive(Default)]
struct ServiceLog {
    connects: AtomicUsize,
    inits: AtomicUsize,
    /// Text chunks received, per session.
    chunks: Mutex<Vec<Vec<String>>>,
}

#[derive(Clone)]
struct ScriptedConnector {
    plans: Arc<Mutex<VecDeque<Plan>>>,
    log: Arc<ServiceLog>,
}

impl ScriptedConnector {
    fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: Arc::new(Mutex::new(plans.into_iter().collect())),
            log: Arc::new(ServiceLog::default()),
        }
    }

    fn sessions(&self) -> Vec<Vec<String>> {
        self.log.chunks.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self) -> speakstream::Result<SessionChannels> {
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().unwrap().pop_front().unwrap_or(Plan::Complete);
        if matches!(plan, Plan::Refuse) {
            return Err(SpeakError::Connect {
                message: "connection refused".to_string(),
            });
        }
        let session = {
            let mut chunks = self.log.chunks.lock().unwrap();
            chunks.push(Vec::new());
            chunks.len() - 1
        };

        let (tx, rx) = mpsc::unbounded_channel();
        Ok(SessionChannels {
            outbound: Box::new(ScriptedOutbound {
                tx: Some(tx),
                session,
                log: Arc::clone(&self.log),
            }),
            inbound: Box::new(ScriptedInbound {
                rx,
                plan,
                confirmed: 0,
                started: false,
            }),
        })
    }
}

struct ScriptedOutbound {
    tx: Option<mpsc::UnboundedSender<Wire>>,
    session: usize,
    log: Arc<ServiceLog>,
}

#[async_trait::async_trait]
impl OutboundChannel for ScriptedOutbound {
    async fn send(&mut self, message: &OutboundMessage) -> speakstream::Result<()> {
        let wire = match message {
            OutboundMessage::Init { .. } => {
                self.log.inits.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
            OutboundMessage::Text(text) => {
                self.log.chunks.lock().unwrap()[self.session].push(text.clone());
                Wire::Text(text.clone())
            }
            OutboundMessage::EndOfStream => Wire::End,
        };
        if let Some(tx) = &self.tx {
            // The service side may already be gone after a scripted drop.
            let _ = tx.send(wire);
        }
        Ok(())
    }

    async fn close(&mut self) -> speakstream::Result<()> {
        self.tx = None;
        Ok(())
    }
}

struct ScriptedInbound {
    rx: mpsc::UnboundedReceiver<Wire>,
    plan: Plan,
    confirmed: usize,
    started: bool,
}

impl ScriptedInbound {
    fn limit(&self) -> Option<usize> {
        match self.plan {
            Plan::DropAfter(n) | Plan::StallAfter(n) => Some(n),
            Plan::Garbled { drop_after, .. } => Some(drop_after),
            Plan::Complete | Plan::ServiceError | Plan::Refuse => None,
        }
    }

    fn exhausted(&self) -> bool {
        self.limit().is_some_and(|limit| self.confirmed >= limit)
    }
}

#[async_trait::async_trait]
impl InboundChannel for ScriptedInbound {
    async fn recv(&mut self) -> speakstream::Result<InboundMessage> {
        if self.exhausted() {
            if matches!(self.plan, Plan::StallAfter(_)) {
                std::future::pending::<()>().await;
            }
            return Err(SpeakError::SessionDropped {
                reason: "connection reset by peer".to_string(),
            });
        }

        match self.rx.recv().await {
            Some(Wire::Text(text)) => {
                if matches!(self.plan, Plan::ServiceError) {
                    return Err(SpeakError::Service {
                        message: "quota_exceeded".to_string(),
                    });
                }

                let mut chars = Vec::new();
                let mut audio = Vec::new();
                if !self.started {
                    self.started = true;
                    chars.push(" ".to_string());
                    if let Plan::Garbled { noise, .. } = self.plan {
                        chars.extend(noise.chars().map(String::from));
                    }
                }
                for c in text.chars() {
                    if self.exhausted() {
                        break;
                    }
                    chars.push(c.to_string());
                    audio.extend_from_slice(c.to_string().as_bytes());
                    self.confirmed += 1;
                }

                Ok(InboundMessage {
                    audio: (!audio.is_empty()).then_some(audio),
                    chars,
                    is_final: false,
                })
            }
            Some(Wire::End) => Ok(InboundMessage {
                audio: None,
                chars: Vec::new(),
                is_final: true,
            }),
            None => Err(SpeakError::SessionDropped {
                reason: "closed".to_string(),
            }),
        }
    }
}

/// Streams `TEXT` a word at a time with a pause before each token, so sessions
/// drop while text is still being produced.
struct SlowSource {
    inner: StaticSource,
    delay: Duration,
}

impl SlowSource {
    fn new(text: &str, delay: Duration) -> Self {
        Self {
            inner: StaticSource::from_text(text),
            delay,
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for SlowSource {
    async fn next_token(&mut self) -> speakstream::Result<Option<String>> {
        tokio::time::sleep(self.delay).await;
        self.inner.next_token().await
    }
}

fn settings(max_attempts: u32) -> SessionSettings {
    SessionSettings {
        voice_settings: VoiceSettings {
            stability: 0.7,
            similarity_boost: 0.75,
        },
        api_key: ApiKey::new("test-key"),
        max_attempts,
        displacement_tolerance: 2,
        channel_buffer_size: 8,
        attempt_timeout: None,
    }
}

fn speech_pipeline(
    connector: &ScriptedConnector,
    settings: SessionSettings,
) -> (SpeechPipeline, Arc<Mutex<CollectedAudio>>) {
    let output = CollectorOutput::new();
    let audio = output.handle();
    let buffer = settings.channel_buffer_size;
    let manager = SessionManager::new(Box::new(connector.clone()), Box::new(output), settings);
    (SpeechPipeline::new(manager, buffer), audio)
}

fn without_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn spoken(audio: &Arc<Mutex<CollectedAudio>>) -> String {
    String::from_utf8(audio.lock().unwrap().bytes.clone()).unwrap()
}

fn assert_output_lifecycle(audio: &Arc<Mutex<CollectedAudio>>) {
    let audio = audio.lock().unwrap();
    assert_eq!(audio.acquisitions, audio.releases, "output left acquired");
    assert_eq!(audio.writes_while_inactive, 0);
}

#[tokio::test]
async fn test_clean_run_speaks_everything_once() {
    let connector = ScriptedConnector::new([Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));
    let ledger = pipeline.ledger();

    let report = pipeline.run(&mut StaticSource::from_text(TEXT)).await.unwrap();

    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(TEXT));
    assert_eq!(report.retries(), 0);
    assert_eq!(report.attempts[0].outcome, AttemptOutcome::Completed);
    assert_eq!(
        report.states,
        vec![
            SessionState::Idle,
            SessionState::Connecting { attempt: 1 },
            SessionState::Streaming { attempt: 1 },
            SessionState::Closed(CloseKind::Clean),
        ]
    );
    assert_eq!(report.chars_sent, TEXT.chars().count());
    assert_eq!(ledger.snapshot().iter().collect::<String>(), TEXT);
    assert_eq!(connector.log.inits.load(Ordering::SeqCst), 1);
    assert_output_lifecycle(&audio);
    assert_eq!(audio.lock().unwrap().acquisitions, 1);
}

#[tokio::test]
async fn test_drops_resume_without_repeating_or_losing_text() {
    let connector =
        ScriptedConnector::new([Plan::DropAfter(20), Plan::DropAfter(15), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    let report = pipeline.run(&mut StaticSource::from_text(TEXT)).await.unwrap();

    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(TEXT));
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.retries(), 2);
    assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Dropped { .. }));
    assert!(matches!(report.attempts[1].outcome, AttemptOutcome::Dropped { .. }));
    assert_eq!(report.attempts[2].outcome, AttemptOutcome::Completed);

    let resumed: Vec<usize> = report.attempts.iter().map(|a| a.resumed_at).collect();
    assert_eq!(resumed[0], 0);
    assert!(resumed[0] < resumed[1] && resumed[1] < resumed[2], "{resumed:?}");
    assert!(
        report.states.contains(&SessionState::Resyncing { attempt: 2 }),
        "{:?}",
        report.states
    );
    assert_eq!(report.states.last(), Some(&SessionState::Closed(CloseKind::Clean)));
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 3);
    assert_eq!(connector.log.inits.load(Ordering::SeqCst), 3);
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_resumed_session_starts_at_first_unconfirmed_character() {
    let connector = ScriptedConnector::new([Plan::DropAfter(7), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    pipeline.run(&mut StaticSource::from_text(TEXT)).await.unwrap();

    let sessions = connector.sessions();
    assert_eq!(sessions.len(), 2);
    // "The qui" was confirmed, so the second session starts mid-word.
    let resumed: String = sessions[1].concat();
    assert!(resumed.starts_with("ck brown"), "{resumed:?}");
    assert!(spoken(&audio).starts_with("The quick brown"));
}

#[tokio::test]
async fn test_every_dropped_session_releases_output_before_the_next() {
    let connector = ScriptedConnector::new([
        Plan::DropAfter(10),
        Plan::DropAfter(10),
        Plan::DropAfter(10),
        Plan::Complete,
    ]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    pipeline.run(&mut StaticSource::from_text(TEXT)).await.unwrap();

    let collected = audio.lock().unwrap();
    assert_eq!(collected.acquisitions, 4);
    assert_eq!(collected.releases, 4);
    assert_eq!(collected.writes_while_inactive, 0);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let connector = ScriptedConnector::new([Plan::DropAfter(0); 3]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(3));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    assert!(
        matches!(result, Err(SpeakError::RetriesExhausted { attempts: 3 })),
        "{result:?}"
    );
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 3);
    assert!(spoken(&audio).is_empty());
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_single_attempt_budget_does_not_retry() {
    let connector = ScriptedConnector::new([Plan::DropAfter(5), Plan::Complete]);
    let (pipeline, _audio) = speech_pipeline(&connector, settings(1));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    assert!(matches!(result, Err(SpeakError::RetriesExhausted { attempts: 1 })));
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_misaligned_confirmation_is_fatal() {
    let connector = ScriptedConnector::new([
        Plan::Garbled {
            noise: "xyz",
            drop_after: 8,
        },
        Plan::Complete,
    ]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    match result {
        Err(error @ SpeakError::StageFailed { .. }) => {
            assert_eq!(error.stage(), Some(Stage::Resync));
            assert!(!error.is_recoverable());
            assert!(error.to_string().contains("Alignment failed"), "{error}");
        }
        other => panic!("expected alignment failure, got {other:?}"),
    }
    // No second session once alignment is lost.
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 1);
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_service_error_is_fatal() {
    let connector = ScriptedConnector::new([Plan::ServiceError, Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    let error = result.unwrap_err();
    assert_eq!(error.stage(), Some(Stage::Listener));
    assert!(!error.is_recoverable());
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 1);
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    let connector = ScriptedConnector::new([Plan::Refuse]);
    let (pipeline, _audio) = speech_pipeline(&connector, settings(5));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    let error = result.unwrap_err();
    assert_eq!(error.stage(), Some(Stage::Connect));
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnect_failure_after_drop_is_fatal() {
    let connector = ScriptedConnector::new([Plan::DropAfter(10), Plan::Refuse]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    assert_eq!(result.unwrap_err().stage(), Some(Stage::Connect));
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 2);
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_teardown_resumes_on_a_new_session() {
    let connector = ScriptedConnector::new([Plan::StallAfter(12), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));
    let teardown = pipeline.teardown_handle();

    let watcher = {
        let audio = Arc::clone(&audio);
        tokio::spawn(async move {
            while audio.lock().unwrap().bytes.len() < 12 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            teardown.tear_down();
        })
    };

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(&mut StaticSource::from_text(TEXT)),
    )
    .await
    .expect("pipeline hung after teardown")
    .unwrap();
    watcher.await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    match &report.attempts[0].outcome {
        AttemptOutcome::Dropped { reason } => assert!(reason.contains("torn down"), "{reason}"),
        other => panic!("expected drop, got {other:?}"),
    }
    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(TEXT));
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_attempt_deadline_drops_stalled_session() {
    let connector = ScriptedConnector::new([Plan::StallAfter(9), Plan::Complete]);
    let mut settings = settings(5);
    settings.attempt_timeout = Some(Duration::from_millis(200));
    let (pipeline, audio) = speech_pipeline(&connector, settings);

    let report = pipeline.run(&mut StaticSource::from_text(TEXT)).await.unwrap();

    assert_eq!(report.attempts.len(), 2);
    match &report.attempts[0].outcome {
        AttemptOutcome::Dropped { reason } => assert!(reason.contains("exceeded"), "{reason}"),
        other => panic!("expected drop, got {other:?}"),
    }
    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(TEXT));
}

#[tokio::test]
async fn test_multibyte_text_survives_a_drop() {
    let text = "Ça va? «Très» bien—merci! À bientôt, mon ami.";
    let connector = ScriptedConnector::new([Plan::DropAfter(11), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    pipeline.run(&mut StaticSource::from_text(text)).await.unwrap();

    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(text));
}

#[tokio::test]
async fn test_drops_while_producer_is_still_streaming() {
    for first_drop in [0, 1, 5, 13, 30, 60] {
        let connector = ScriptedConnector::new([
            Plan::DropAfter(first_drop),
            Plan::DropAfter(8),
            Plan::Complete,
        ]);
        let (pipeline, audio) = speech_pipeline(&connector, settings(5));
        let ledger = pipeline.ledger();

        let report = pipeline
            .run(&mut SlowSource::new(TEXT, Duration::from_millis(2)))
            .await
            .unwrap();

        assert_eq!(
            without_whitespace(&spoken(&audio)),
            without_whitespace(TEXT),
            "first drop after {first_drop}"
        );
        assert_eq!(report.chars_sent, TEXT.chars().count());
        assert_eq!(ledger.snapshot().iter().collect::<String>(), TEXT);
        assert_eq!(report.attempts.len(), 3);

        let resumed: Vec<usize> = report.attempts.iter().map(|a| a.resumed_at).collect();
        assert!(
            resumed.windows(2).all(|pair| pair[0] <= pair[1]),
            "first drop after {first_drop}: {resumed:?}"
        );
        assert!(resumed.iter().all(|&at| at <= report.chars_sent));
        assert_output_lifecycle(&audio);
    }
}

#[tokio::test]
async fn test_drop_before_any_confirmation_restarts_from_the_beginning() {
    let connector = ScriptedConnector::new([Plan::DropAfter(0), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));

    let report = pipeline
        .run(&mut SlowSource::new(TEXT, Duration::from_millis(1)))
        .await
        .unwrap();

    assert_eq!(report.attempts.len(), 2);
    assert!(matches!(report.attempts[0].outcome, AttemptOutcome::Dropped { .. }));
    assert_eq!(report.attempts[1].resumed_at, 0);
    assert_eq!(report.attempts[1].outcome, AttemptOutcome::Completed);

    let sessions = connector.sessions();
    assert!(sessions[1].concat().starts_with("The quick"), "{sessions:?}");
    assert_eq!(without_whitespace(&spoken(&audio)), without_whitespace(TEXT));
    assert_output_lifecycle(&audio);
}

#[tokio::test]
async fn test_interrupt_releases_output_and_stops_without_retrying() {
    let connector = ScriptedConnector::new([Plan::StallAfter(12), Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));
    let interrupt = pipeline.interrupt_handle();

    let watcher = {
        let audio = Arc::clone(&audio);
        tokio::spawn(async move {
            while audio.lock().unwrap().bytes.len() < 12 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            interrupt.interrupt();
        })
    };

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        pipeline.run(&mut SlowSource::new(TEXT, Duration::from_millis(1))),
    )
    .await
    .expect("pipeline hung after interrupt");
    watcher.await.unwrap();

    assert!(matches!(result, Err(SpeakError::Interrupted)), "{result:?}");
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 1);
    let collected = audio.lock().unwrap();
    assert_eq!(collected.acquisitions, 1);
    assert_eq!(collected.releases, 1);
    assert_eq!(collected.bytes.len(), 12);
}

#[tokio::test]
async fn test_interrupt_before_connecting_never_opens_a_session() {
    let connector = ScriptedConnector::new([Plan::Complete]);
    let (pipeline, audio) = speech_pipeline(&connector, settings(5));
    pipeline.interrupt_handle().interrupt();

    let result = pipeline.run(&mut StaticSource::from_text(TEXT)).await;

    assert!(matches!(result, Err(SpeakError::Interrupted)), "{result:?}");
    assert_eq!(connector.log.connects.load(Ordering::SeqCst), 0);
    assert!(spoken(&audio).is_empty());
    assert_output_lifecycle(&audio);
}
