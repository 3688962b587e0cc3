//! Default configuration constants for speakstream.
//!
//! Shared by the config types and the stations so the two never drift apart.

/// Base URI of the streaming synthesis service.
pub const SYNTHESIS_ENDPOINT: &str = "wss://api.elevenlabs.io";

/// Default synthesis model. The multilingual model is needed for non-English
/// model output; alignment normalization handles its transliteration.
pub const MODEL_ID: &str = "eleven_multilingual_v2";

/// Default voice identity.
pub const VOICE_ID: &str = "HxxnFvSdN4AyRUpj6yh7";

/// Voice stability sent in the init message.
pub const STABILITY: f32 = 0.70;

/// Voice similarity boost sent in the init message.
pub const SIMILARITY_BOOST: f32 = 0.75;

/// Session attempts before giving up on a request.
pub const MAX_ATTEMPTS: u32 = 5;

/// Maximum positional slack when aligning sent and received characters.
///
/// Found empirically; treat as tunable rather than a protocol guarantee.
pub const DISPLACEMENT_TOLERANCE: usize = 2;

/// Number of leading characters of each session's alignment that do not
/// correspond to submitted text (the init message's single space).
pub const LEADING_ARTIFACT_LEN: usize = 1;

/// Capacity of the chunk and audio queues between stations.
pub const CHANNEL_BUFFER_SIZE: usize = 64;

/// Audio player executable.
pub const PLAYER_PROGRAM: &str = "mpv";

/// Player flags: no cache, no terminal UI, read raw audio from stdin.
pub const PLAYER_ARGS: &[&str] = &["--no-cache", "--no-terminal", "--", "fd://0"];

/// Chat completion endpoint used by the `llm` token source.
pub const LLM_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Chat model used by the `llm` token source.
pub const LLM_MODEL: &str = "gpt-4";

/// Sampling temperature for the `llm` token source.
pub const LLM_TEMPERATURE: f32 = 1.0;

/// Environment variable holding the synthesis API key.
pub const SYNTHESIS_KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// Environment variable holding the language-model API key.
pub const LLM_KEY_ENV: &str = "OPENAI_API_KEY";
