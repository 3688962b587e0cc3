//! JSON message protocol of the streaming synthesis service.
//!
//! Outbound: one init message carrying voice settings and the API key, one
//! text message per chunk, then an empty-text end-of-stream message.
//! Inbound: JSON objects with optional base64 audio, an optional alignment
//! block and an optional final flag.

use crate::config::{ApiKey, SynthesisConfig};
use crate::error::{Result, SpeakError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use url::Url;

/// Voice parameters sent once per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
}

impl From<&SynthesisConfig> for VoiceSettings {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            stability: config.stability,
            similarity_boost: config.similarity_boost,
        }
    }
}

/// Messages the client sends to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Opens a session. The single-space text is what the service reports
    /// back as the leading alignment artifact.
    Init {
        voice_settings: VoiceSettings,
        api_key: ApiKey,
    },
    /// One chunk of text, asking the service to start generating.
    Text(String),
    /// No more text for this session.
    EndOfStream,
}

impl OutboundMessage {
    /// Serialize message to JSON string.
    pub fn to_json(&self) -> String {
        let value = match self {
            OutboundMessage::Init {
                voice_settings,
                api_key,
            } => json!({
                "text": " ",
                "voice_settings": {
                    "stability": voice_settings.stability,
                    "similarity_boost": voice_settings.similarity_boost,
                },
                "xi_api_key": api_key.expose(),
            }),
            OutboundMessage::Text(text) => json!({
                "text": text,
                "try_trigger_generation": true,
            }),
            OutboundMessage::EndOfStream => json!({ "text": "" }),
        };
        value.to_string()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default)]
    normalized_alignment: Option<RawAlignment>,
    #[serde(default)]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAlignment {
    #[serde(default)]
    chars: Option<Vec<String>>,
}

/// A decoded message from the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Decoded audio bytes, if the message carried any.
    pub audio: Option<Vec<u8>>,
    /// Characters the service confirmed as synthesized, in order.
    pub chars: Vec<String>,
    /// True on the last message of a session.
    pub is_final: bool,
}

impl InboundMessage {
    /// Parse and decode one text frame.
    ///
    /// Malformed JSON or base64 is a protocol error. A message carrying an
    /// `error` field is a service error.
    pub fn from_json(s: &str) -> Result<Self> {
        let raw: RawInbound = serde_json::from_str(s).map_err(|e| SpeakError::Protocol {
            message: format!("invalid JSON from service: {e}"),
        })?;

        if let Some(error) = raw.error.filter(|e| !e.is_null()) {
            let detail = match error {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let message = match raw.message {
                Some(message) => format!("{detail}: {message}"),
                None => detail,
            };
            return Err(SpeakError::Service { message });
        }

        let audio = match raw.audio.as_deref() {
            None | Some("") => None,
            Some(encoded) => Some(STANDARD.decode(encoded).map_err(|e| {
                SpeakError::Protocol {
                    message: format!("invalid base64 audio: {e}"),
                }
            })?),
        };

        let chars = raw
            .normalized_alignment
            .and_then(|alignment| alignment.chars)
            .unwrap_or_default();

        Ok(Self {
            audio,
            chars,
            is_final: raw.is_final.unwrap_or(false),
        })
    }
}

/// Builds the streaming-input URL for one session.
///
/// The API key is sent in the init message, never in the URL.
pub fn session_url(config: &SynthesisConfig) -> Result<Url> {
    let mut url = Url::parse(&config.endpoint).map_err(|e| SpeakError::ConfigInvalidValue {
        key: "synthesis.endpoint".to_string(),
        message: e.to_string(),
    })?;

    url.path_segments_mut()
        .map_err(|_| SpeakError::ConfigInvalidValue {
            key: "synthesis.endpoint".to_string(),
            message: "cannot be a base URL".to_string(),
        })?
        .pop_if_empty()
        .extend(["v1", "text-to-speech", &config.voice_id, "stream-input"]);
    url.query_pairs_mut()
        .append_pair("model_id", &config.model_id);

    Ok(url)
}
