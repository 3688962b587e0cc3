//! speakstream - Speak a language model's answer while it is still being written
//!
//! Streams text tokens into a speech-synthesis session, plays the audio as it
//! arrives, and resumes from the first unconfirmed character when the session
//! drops mid-stream.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod diagnostics;
pub mod error;
pub mod ledger;
#[cfg(feature = "llm")]
pub mod llm;
pub mod resync;
pub mod session;
pub mod source;
pub mod streaming;

// Core traits (source → session → output)
pub use session::transport::{InboundChannel, OutboundChannel, SessionConnector};
pub use source::{ReaderSource, StaticSource, TokenSource};
pub use streaming::sink::{AudioOutput, CollectorOutput, ProcessAudioOutput};

// Pipeline
pub use session::manager::{
    InterruptHandle, SessionManager, SessionReport, SessionSettings, TeardownHandle,
};
pub use streaming::pipeline::SpeechPipeline;

// Resync
pub use ledger::{ReceivedLedger, SentLedger};
pub use resync::{Resync, ResyncMatcher};

// Error handling
pub use error::{AlignmentError, Result, SpeakError, Stage};

// Config
pub use config::{ApiKey, Config};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
