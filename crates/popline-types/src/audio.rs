//! Audio frame definitions.

use serde::{Deserialize, Serialize};

/// Sample rate of carrier telephony audio (narrow-band, 8 kHz).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Encoding of the bytes carried by an [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 8-bit logarithmically companded samples (G.711 mu-law).
    Mulaw,
    /// Signed 16-bit little-endian linear PCM.
    Pcm16,
}

/// An immutable buffer of audio tagged with its encoding and sample rate.
///
/// Frames are transient: they live for one conversion or transmission step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    encoding: AudioEncoding,
    sample_rate: u32,
    data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(encoding: AudioEncoding, sample_rate: u32, data: Vec<u8>) -> Self {
        Self {
            encoding,
            sample_rate,
            data,
        }
    }

    /// A frame of companded telephone audio at 8 kHz.
    pub fn mulaw(data: Vec<u8>) -> Self {
        Self::new(AudioEncoding::Mulaw, TELEPHONY_SAMPLE_RATE, data)
    }

    pub fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the frame, returning the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
