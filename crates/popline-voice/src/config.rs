//! Speech provider settings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

fn default_recognizer_endpoint() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_recognizer_model() -> String {
    "nova-2".to_string()
}

fn default_language() -> String {
    "ja".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_utterance_end_ms() -> u32 {
    1000
}

fn default_synthesizer_endpoint() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "21m00Tcm4TlvDq8ikWAM".to_string()
}

fn default_model_id() -> String {
    "eleven_flash_v2_5".to_string()
}

fn default_sample_rate() -> u32 {
    24_000
}

/// Streaming speech-to-text provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "default_recognizer_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_recognizer_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Failing to connect within this window is fatal to the call.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Silence after which the provider closes an utterance.
    #[serde(default = "default_utterance_end_ms")]
    pub utterance_end_ms: u32,
}

impl RecognizerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_recognizer_endpoint(),
            api_key: String::new(),
            model: default_recognizer_model(),
            language: default_language(),
            connect_timeout_secs: default_connect_timeout_secs(),
            utterance_end_ms: default_utterance_end_ms(),
        }
    }
}

impl fmt::Debug for RecognizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecognizerConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("utterance_end_ms", &self.utterance_end_ms)
            .finish()
    }
}

/// Streaming text-to-speech provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct SynthesizerConfig {
    #[serde(default = "default_synthesizer_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Rate of the PCM stream requested from the provider.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_synthesizer_endpoint(),
            api_key: String::new(),
            voice_id: default_voice_id(),
            model_id: default_model_id(),
            sample_rate: default_sample_rate(),
        }
    }
}

impl fmt::Debug for SynthesizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizerConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
