//! Text-to-speech.
//!
//! Providers return linear PCM. [`SpeechSynthesizer::synthesize_stream`]
//! buffers the whole utterance, converts it once to 8 kHz mu-law and hands it
//! out in 20 ms frames, the cadence the carrier paces playback at.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use popline_types::AudioFrame;
use serde_json::json;

use crate::codec::{convert_to_outbound_format, pcm_from_le_bytes};
use crate::config::SynthesizerConfig;
use crate::error::VoiceError;

/// Outbound frame size: 20 ms of 8 kHz mu-law.
pub const FRAME_BYTES: usize = 160;

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single utterance's text.
const MAX_TTS_INPUT_BYTES: usize = 8 * 1024;

/// A complete synthesized utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text` to linear PCM.
    async fn fetch_pcm(&self, text: &str) -> Result<PcmAudio, VoiceError>;

    /// Synthesizes `text` and feeds carrier-ready frames to `on_chunk`.
    /// Returns the number of frames produced.
    async fn synthesize_stream(
        &self,
        text: &str,
        on_chunk: &mut (dyn FnMut(AudioFrame) + Send),
    ) -> Result<usize, VoiceError> {
        let pcm = self.fetch_pcm(text).await?;
        let mulaw = convert_to_outbound_format(&pcm.samples, pcm.sample_rate);
        Ok(emit_frames(&mulaw, on_chunk))
    }
}

/// Splits mu-law audio into [`FRAME_BYTES`] frames; the last may be short.
pub fn emit_frames(mulaw: &[u8], on_chunk: &mut (dyn FnMut(AudioFrame) + Send)) -> usize {
    let mut frames = 0;
    for chunk in mulaw.chunks(FRAME_BYTES) {
        on_chunk(AudioFrame::mulaw(chunk.to_vec()));
        frames += 1;
    }
    frames
}

/// ElevenLabs streaming synthesis.
#[derive(Debug, Clone)]
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    config: SynthesizerConfig,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream?output_format=pcm_{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.voice_id,
            self.config.sample_rate
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn fetch_pcm(&self, text: &str) -> Result<PcmAudio, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if text.trim().is_empty() {
            return Ok(PcmAudio {
                samples: Vec::new(),
                sample_rate: self.config.sample_rate,
            });
        }
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "synthesizer api_key is not set".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.stream_url())
            .header("xi-api-key", &self.config.api_key)
            .json(&json!({
                "text": text,
                "model_id": self.config.model_id,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "provider returned {status}: {body}"
            )));
        }

        let mut raw = Vec::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            raw.extend_from_slice(&chunk?);
        }
        tracing::debug!(bytes = raw.len(), chars = text.chars().count(), "speech synthesized");

        Ok(PcmAudio {
            samples: pcm_from_le_bytes(&raw),
            sample_rate: self.config.sample_rate,
        })
    }
}
