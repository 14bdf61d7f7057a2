//! Streaming speech-to-text.
//!
//! A [`SpeechRecognizer`] opens one streaming session per call. The session
//! is a pair of channels: a [`RecognizerHandle`] that accepts audio and a
//! close request, and a receiver of [`RecognizerEvent`]s carrying interim and
//! final transcripts plus asynchronous error/close notifications.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use popline_types::{AudioFrame, Transcript, TELEPHONY_SAMPLE_RATE};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::config::RecognizerConfig;
use crate::error::VoiceError;

/// Pending audio frames per session (about five seconds at 20 ms frames).
const AUDIO_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 64;

/// How long to wait for trailing results after asking the provider to close.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerEvent {
    Transcript(Transcript),
    Error(String),
    Closed,
}

/// Requests flowing from the call handler to a recognizer session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerCommand {
    Audio(Vec<u8>),
    Close,
}

/// Sending half of a recognizer session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecognizerHandle {
    commands: mpsc::Sender<RecognizerCommand>,
}

impl RecognizerHandle {
    /// Creates a handle and the command receiver a recognizer drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RecognizerCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { commands: tx }, rx)
    }

    /// Queues a frame for the provider without waiting. Frames are dropped
    /// when the queue is full; audio ingestion never blocks.
    pub fn send(&self, frame: &AudioFrame) -> Result<(), VoiceError> {
        match self
            .commands
            .try_send(RecognizerCommand::Audio(frame.data().to_vec()))
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(bytes = frame.len(), "recognizer queue full, dropping audio");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VoiceError::Closed),
        }
    }

    /// Asks the session to flush and close. Idempotent.
    pub fn close(&self) {
        match self.commands.try_send(RecognizerCommand::Close) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    let _ = commands.send(cmd).await;
                });
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// An open recognizer session.
#[derive(Debug)]
pub struct RecognizerStream {
    pub handle: RecognizerHandle,
    pub events: mpsc::Receiver<RecognizerEvent>,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Opens a streaming session for 8 kHz mu-law mono audio.
    async fn connect(&self) -> Result<RecognizerStream, VoiceError>;
}

/// Connects, treating anything slower than `timeout` as a failure.
pub async fn connect_with_timeout(
    recognizer: &dyn SpeechRecognizer,
    timeout: Duration,
) -> Result<RecognizerStream, VoiceError> {
    tokio::time::timeout(timeout, recognizer.connect())
        .await
        .map_err(|_| VoiceError::ConnectTimeout(timeout))?
}

/// Deepgram live transcription over a websocket.
#[derive(Debug, Clone)]
pub struct DeepgramRecognizer {
    config: RecognizerConfig,
}

impl DeepgramRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self { config }
    }

    fn listen_url(&self) -> String {
        format!(
            "{}?model={}&language={}&encoding=mulaw&sample_rate={}&channels=1\
             &interim_results=true&utterance_end_ms={}&vad_events=true&smart_format=true",
            self.config.endpoint,
            self.config.model,
            self.config.language,
            TELEPHONY_SAMPLE_RATE,
            self.config.utterance_end_ms,
        )
    }
}

#[async_trait]
impl SpeechRecognizer for DeepgramRecognizer {
    async fn connect(&self) -> Result<RecognizerStream, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config("recognizer api_key is not set".to_string()));
        }

        let mut request = self.listen_url().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid recognizer api_key: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, auth);

        let (socket, _) = tokio_tungstenite::connect_async(request).await?;
        tracing::debug!(model = %self.config.model, "recognizer connected");

        let (handle, commands) = RecognizerHandle::channel(AUDIO_QUEUE);
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE);
        tokio::spawn(pump(socket, commands, events_tx));

        Ok(RecognizerStream { handle, events })
    }
}

async fn pump<S>(
    socket: tokio_tungstenite::WebSocketStream<S>,
    mut commands: mpsc::Receiver<RecognizerCommand>,
    events: mpsc::Sender<RecognizerEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let mut closing = false;

    loop {
        tokio::select! {
            cmd = commands.recv(), if !closing => match cmd {
                Some(RecognizerCommand::Audio(bytes)) => {
                    if let Err(e) = sink.send(Message::Binary(bytes.into())).await {
                        tracing::warn!(error = %e, "recognizer send failed");
                        let _ = events.send(RecognizerEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(RecognizerCommand::Close) | None => {
                    closing = true;
                    if let Err(e) = sink
                        .send(Message::Text(r#"{"type":"CloseStream"}"#.into()))
                        .await
                    {
                        tracing::debug!(error = %e, "recognizer close request failed");
                        break;
                    }
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_provider_message(text.as_str()) {
                        let _ = events.send(event).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "recognizer stream error");
                    let _ = events.send(RecognizerEvent::Error(e.to_string())).await;
                    break;
                }
            },
            _ = tokio::time::sleep(CLOSE_GRACE), if closing => {
                tracing::debug!("recognizer did not close in time");
                break;
            }
        }
    }

    let _ = events.send(RecognizerEvent::Closed).await;
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ProviderMessage {
    Results {
        channel: ResultChannel,
        #[serde(default)]
        is_final: bool,
    },
    UtteranceEnd {},
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ResultChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Maps one provider text frame to an event. Empty transcripts and
/// bookkeeping messages yield nothing.
fn parse_provider_message(text: &str) -> Option<RecognizerEvent> {
    let message: ProviderMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognized recognizer message");
            return None;
        }
    };

    match message {
        ProviderMessage::Results { channel, is_final } => {
            let best = channel.alternatives.into_iter().next()?;
            if best.transcript.is_empty() {
                return None;
            }
            Some(RecognizerEvent::Transcript(Transcript {
                text: best.transcript,
                is_final,
                confidence: best.confidence,
            }))
        }
        ProviderMessage::UtteranceEnd {} => {
            tracing::debug!("utterance end");
            None
        }
        ProviderMessage::Other => None,
    }
}
