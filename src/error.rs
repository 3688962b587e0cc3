//! Error types for speakstream.

use std::fmt;
use thiserror::Error;

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Chunker,
    Sender,
    Listener,
    Sink,
    Resync,
    Producer,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::Chunker => "chunker",
            Stage::Sender => "sender",
            Stage::Listener => "listener",
            Stage::Sink => "sink",
            Stage::Resync => "resync",
            Stage::Producer => "producer",
        };
        f.write_str(name)
    }
}

/// Details of a character that could not be aligned within tolerance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "character {character:?} (sent index {sent_index}) expected at {expected} but found at {found} (tolerance {tolerance}); sent context {sent_context:?}, received context {received_context:?}"
)]
pub struct AlignmentError {
    /// The normalized character being matched.
    pub character: String,
    /// Index into the sent ledger slice.
    pub sent_index: usize,
    /// Position in the received ledger where the character was expected.
    pub expected: usize,
    /// Position where it was actually found.
    pub found: usize,
    /// Displacement tolerance in effect.
    pub tolerance: usize,
    /// Normalized sent characters around `sent_index`.
    pub sent_context: String,
    /// Received characters around `expected`.
    pub received_context: String,
}

#[derive(Error, Debug)]
pub enum SpeakError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("API key for {service} not set (export {env_var})")]
    MissingApiKey { service: String, env_var: String },

    // Audio output errors
    #[error("Audio output unavailable: '{program}' not found on PATH")]
    AudioUnavailable { program: String },

    #[error("Audio output failed: {message}")]
    AudioOutput { message: String },

    // Session errors
    #[error("Failed to connect to synthesis service: {message}")]
    Connect { message: String },

    #[error("Synthesis session dropped: {reason}")]
    SessionDropped { reason: String },

    #[error("Synthesis transport error: {message}")]
    Transport { message: String },

    #[error("Synthesis protocol error: {message}")]
    Protocol { message: String },

    #[error("Synthesis service error: {message}")]
    Service { message: String },

    #[error("Alignment failed: {0}")]
    Alignment(#[from] AlignmentError),

    #[error("Gave up after {attempts} session attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Interrupted before all text was spoken")]
    Interrupted,

    #[error("{stage} stage failed: {source}")]
    StageFailed {
        stage: Stage,
        #[source]
        source: Box<SpeakError>,
    },

    #[error("Channel to {stage} stage closed unexpectedly")]
    ChannelClosed { stage: Stage },

    // Upstream text errors
    #[error("Token source error: {message}")]
    TokenSource { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeakError {
    /// Returns true for the one error class the session manager retries.
    ///
    /// Looks through stage attribution, so a drop seen by any station counts.
    pub fn is_recoverable(&self) -> bool {
        match self {
            SpeakError::SessionDropped { .. } => true,
            SpeakError::StageFailed { source, .. } => source.is_recoverable(),
            _ => false,
        }
    }

    /// Attributes this error to a pipeline stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            already @ SpeakError::StageFailed { .. } => already,
            other => SpeakError::StageFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SpeakError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, SpeakError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = SpeakError::ConfigInvalidValue {
            key: "session.max_attempts".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for session.max_attempts: must be at least 1"
        );
    }

    #[test]
    fn test_audio_unavailable_display() {
        let error = SpeakError::AudioUnavailable {
            program: "mpv".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio output unavailable: 'mpv' not found on PATH"
        );
    }

    #[test]
    fn test_missing_api_key_display() {
        let error = SpeakError::MissingApiKey {
            service: "ElevenLabs".to_string(),
            env_var: "ELEVENLABS_API_KEY".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "API key for ElevenLabs not set (export ELEVENLABS_API_KEY)"
        );
    }

    #[test]
    fn test_only_session_drop_is_recoverable() {
        assert!(
            SpeakError::SessionDropped {
                reason: "close frame".to_string()
            }
            .is_recoverable()
        );
        assert!(
            !SpeakError::Transport {
                message: "tls".to_string()
            }
            .is_recoverable()
        );
        assert!(!SpeakError::RetriesExhausted { attempts: 3 }.is_recoverable());
        assert!(!SpeakError::Interrupted.is_recoverable());
        assert!(
            SpeakError::SessionDropped {
                reason: "reset".to_string()
            }
            .in_stage(Stage::Listener)
            .is_recoverable()
        );
        assert!(
            !SpeakError::Service {
                message: "quota".to_string()
            }
            .in_stage(Stage::Listener)
            .is_recoverable()
        );
        assert!(
            !SpeakError::AudioUnavailable {
                program: "mpv".to_string()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_in_stage_wraps_once() {
        let error = SpeakError::Protocol {
            message: "bad json".to_string(),
        }
        .in_stage(Stage::Listener)
        .in_stage(Stage::Sink);

        assert_eq!(error.stage(), Some(Stage::Listener));
        assert_eq!(
            error.to_string(),
            "listener stage failed: Synthesis protocol error: bad json"
        );
    }

    #[test]
    fn test_alignment_error_carries_context() {
        let detail = AlignmentError {
            character: "c".to_string(),
            sent_index: 2,
            expected: 2,
            found: 5,
            tolerance: 2,
            sent_context: "abcdef".to_string(),
            received_context: "abXYZcdef".to_string(),
        };
        let error: SpeakError = detail.into();
        let message = error.to_string();
        assert!(message.contains("expected at 2 but found at 5"));
        assert!(message.contains("tolerance 2"));
        assert!(message.contains("received context \"abXYZcdef\""));
    }

    #[test]
    fn test_alignment_error_display() {
        let detail = AlignmentError {
            character: "x".to_string(),
            sent_index: 0,
            expected: 1,
            found: 4,
            tolerance: 2,
            sent_context: "xy".to_string(),
            received_context: "abcxy".to_string(),
        };
        assert_eq!(
            detail.to_string(),
            "character \"x\" (sent index 0) expected at 1 but found at 4 (tolerance 2); sent context \"xy\", received context \"abcxy\""
        );
        let error_trait: &dyn std::error::Error = &detail;
        assert!(error_trait.source().is_none());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "player went away");
        let error: SpeakError = io_error.into();
        assert!(error.to_string().contains("player went away"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: SpeakError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_stage() {
        let error = SpeakError::Io(io::Error::other("pipe")).in_stage(Stage::Sink);
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<SpeakError>();
        assert_sync::<SpeakError>();
    }
}
