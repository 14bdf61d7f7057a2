//! Voice plumbing for the popline phone line.
//!
//! Carrier audio arrives as 8 kHz mu-law and leaves the same way. In between,
//! a streaming recognizer turns caller speech into transcripts and a
//! synthesizer turns agent replies back into audio. [`codec`] converts
//! between the two worlds and [`filler`] covers the silence while the agent
//! thinks.

pub mod codec;
pub mod config;
pub mod error;
pub mod filler;
pub mod stt;
pub mod tts;

pub use config::{RecognizerConfig, SynthesizerConfig};
pub use error::VoiceError;
pub use filler::{AudioSink, FillerManager, FillerPicker, FillerState, FillerTiming};
pub use stt::{
    connect_with_timeout, DeepgramRecognizer, RecognizerCommand, RecognizerEvent,
    RecognizerHandle, RecognizerStream, SpeechRecognizer,
};
pub use tts::{ElevenLabsSynthesizer, PcmAudio, SpeechSynthesizer, FRAME_BYTES};
