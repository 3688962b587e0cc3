use crate::defaults;
use crate::error::{Result, SpeakError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub synthesis: SynthesisConfig,
    pub session: SessionConfig,
    pub player: PlayerConfig,
    pub llm: LlmConfig,
}

/// Speech-synthesis service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub endpoint: String,
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

/// Session retry and pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub max_attempts: u32,
    pub displacement_tolerance: usize,
    pub channel_buffer_size: usize,
    /// Per-attempt deadline. Elapsing tears the session down and resyncs.
    pub attempt_timeout_secs: Option<u64>,
}

/// External audio player configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub program: String,
    pub args: Vec<String>,
}

/// Chat completion token source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::SYNTHESIS_ENDPOINT.to_string(),
            voice_id: defaults::VOICE_ID.to_string(),
            model_id: defaults::MODEL_ID.to_string(),
            stability: defaults::STABILITY,
            similarity_boost: defaults::SIMILARITY_BOOST,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            displacement_tolerance: defaults::DISPLACEMENT_TOLERANCE,
            channel_buffer_size: defaults::CHANNEL_BUFFER_SIZE,
            attempt_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: defaults::PLAYER_PROGRAM.to_string(),
            args: defaults::PLAYER_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::LLM_ENDPOINT.to_string(),
            model: defaults::LLM_MODEL.to_string(),
            temperature: defaults::LLM_TEMPERATURE,
        }
    }
}

/// Secret API key. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Read a key from the environment, failing with a hint naming the variable.
    pub fn from_env(env_var: &str, service: &str) -> Result<Self> {
        match std::env::var(env_var) {
            Ok(key) if !key.trim().is_empty() => Ok(Self(key.trim().to_string())),
            _ => Err(SpeakError::MissingApiKey {
                service: service.to_string(),
                env_var: env_var.to_string(),
            }),
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpeakError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                SpeakError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(SpeakError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - SPEAKSTREAM_VOICE_ID → synthesis.voice_id
    /// - SPEAKSTREAM_MODEL_ID → synthesis.model_id
    /// - SPEAKSTREAM_PLAYER → player.program
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("SPEAKSTREAM_VOICE_ID")
            && !voice.is_empty()
        {
            self.synthesis.voice_id = voice;
        }

        if let Ok(model) = std::env::var("SPEAKSTREAM_MODEL_ID")
            && !model.is_empty()
        {
            self.synthesis.model_id = model;
        }

        if let Ok(player) = std::env::var("SPEAKSTREAM_PLAYER")
            && !player.is_empty()
        {
            self.player.program = player;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let unit_range = 0.0..=1.0;
        if !unit_range.contains(&self.synthesis.stability) {
            return Err(invalid("synthesis.stability", "must be between 0.0 and 1.0"));
        }
        if !unit_range.contains(&self.synthesis.similarity_boost) {
            return Err(invalid(
                "synthesis.similarity_boost",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.synthesis.voice_id.trim().is_empty() {
            return Err(invalid("synthesis.voice_id", "must not be empty"));
        }
        if self.session.max_attempts == 0 {
            return Err(invalid("session.max_attempts", "must be at least 1"));
        }
        if self.session.channel_buffer_size == 0 {
            return Err(invalid("session.channel_buffer_size", "must be at least 1"));
        }
        if self.player.program.trim().is_empty() {
            return Err(invalid("player.program", "must not be empty"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/speakstream/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("speakstream").join("config.toml"))
    }
}

fn invalid(key: &str, message: &str) -> SpeakError {
    SpeakError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
