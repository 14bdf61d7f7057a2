//! Carrier media-stream websocket: wire types and the per-call handler.
//!
//! One websocket carries one phone call. Inbound frames are JSON events
//! tagged by `event`; outbound frames are queued on a bounded channel and
//! written by a dedicated send task, so nothing on the call path waits on
//! the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Extension, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use popline_agent::{build_system_prompt, PromptSettings};
use popline_types::{AudioFrame, FillerContext, ToolCall};
use popline_voice::{
    connect_with_timeout, AudioSink, FillerManager, FillerTiming, RecognizerEvent,
    RecognizerHandle,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::AppState;

/// Outbound frames buffered per call. A spoken reply is queued all at once,
/// 50 frames per second of audio.
const OUTBOUND_QUEUE: usize = 4096;

/// Per-call behavior shared by every connection.
#[derive(Debug, Clone)]
pub struct CallSettings {
    pub greeting: String,
    pub apology: String,
    pub prompt: PromptSettings,
    pub filler: FillerTiming,
    /// Upper bound on opening the recognizer session.
    pub connect_timeout: Duration,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            greeting: "つくにんモール渋谷テナント案内です。ご用件をお話しください。".to_string(),
            apology: "申し訳ございません。もう一度お話しいただけますか。".to_string(),
            prompt: PromptSettings::default(),
            filler: FillerTiming::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ── Wire types ──

/// Events received from the carrier.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Stop {
        #[serde(default)]
        stop: Option<StopPayload>,
    },
    Mark {
        mark: MarkPayload,
    },
    Dtmf {
        dtmf: DtmfPayload,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartPayload {
    #[serde(rename = "streamSid", alias = "streamId")]
    pub stream_sid: String,
    #[serde(rename = "callSid", alias = "callId", default)]
    pub call_sid: String,
    #[serde(rename = "accountSid", alias = "accountId", default)]
    pub account_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    /// Base64 mu-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopPayload {
    #[serde(rename = "accountSid", alias = "accountId", default)]
    pub account_sid: String,
    #[serde(rename = "callSid", alias = "callId", default)]
    pub call_sid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub track: Option<String>,
    pub digit: String,
}

/// Events sent to the carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Writes outbound events for one call. Never blocks; a full queue drops
/// the event.
#[derive(Debug, Clone)]
pub struct CallOutput {
    stream_sid: String,
    tx: mpsc::Sender<String>,
}

impl CallOutput {
    pub fn new(stream_sid: String, tx: mpsc::Sender<String>) -> Self {
        Self { stream_sid, tx }
    }

    pub fn media(&self, frame: &AudioFrame) {
        self.emit(&OutboundEvent::Media {
            stream_sid: self.stream_sid.clone(),
            media: OutboundMedia {
                payload: BASE64.encode(frame.data()),
            },
        });
    }

    pub fn mark(&self, name: &str) {
        self.emit(&OutboundEvent::Mark {
            stream_sid: self.stream_sid.clone(),
            mark: MarkPayload {
                name: name.to_string(),
            },
        });
    }

    /// Drops any audio the carrier has queued for playback.
    pub fn clear(&self) {
        self.emit(&OutboundEvent::Clear {
            stream_sid: self.stream_sid.clone(),
        });
    }

    fn emit(&self, event: &OutboundEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode outbound event");
                return;
            }
        };
        if let Err(e) = self.tx.try_send(json) {
            tracing::warn!(stream_id = %self.stream_sid, "failed to queue outbound event: {}", e);
        }
    }
}

// ── Handler ──

/// Everything a background call task needs. Cheap to clone.
#[derive(Clone)]
struct CallContext {
    stream_id: String,
    state: Arc<AppState>,
    output: CallOutput,
    filler: FillerManager,
    /// Completed replies, for `response-<n>` marks.
    responses: Arc<AtomicU64>,
}

struct ActiveCall {
    call: CallContext,
    recognizer: RecognizerHandle,
    tasks: Vec<JoinHandle<()>>,
}

enum Phase {
    AwaitingStart,
    Streaming(ActiveCall),
    Stopped,
}

/// Protocol state machine for one carrier connection.
pub struct MediaStreamHandler {
    state: Arc<AppState>,
    outbound: mpsc::Sender<String>,
    phase: Phase,
}

impl MediaStreamHandler {
    pub fn new(state: Arc<AppState>, outbound: mpsc::Sender<String>) -> Self {
        Self {
            state,
            outbound,
            phase: Phase::AwaitingStart,
        }
    }

    /// Handles one text frame. Malformed or unknown events are logged and
    /// otherwise ignored.
    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unrecognized media stream frame");
            }
        }
    }

    pub async fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Connected { protocol } => {
                tracing::info!(protocol = protocol.as_deref().unwrap_or("-"), "media stream connected");
            }
            InboundEvent::Start { start } => self.on_start(start).await,
            InboundEvent::Media { media } => self.on_media(media),
            InboundEvent::Stop { stop } => {
                tracing::info!(
                    call_id = stop.as_ref().map(|s| s.call_sid.as_str()).unwrap_or("-"),
                    "media stream stopped"
                );
                self.teardown("stop event");
            }
            InboundEvent::Mark { mark } => {
                tracing::debug!(name = %mark.name, "playback mark reached");
            }
            InboundEvent::Dtmf { dtmf } => {
                tracing::info!(digit = %dtmf.digit, "dtmf received");
            }
        }
    }

    async fn on_start(&mut self, start: StartPayload) {
        if !matches!(self.phase, Phase::AwaitingStart) {
            tracing::warn!(stream_id = %start.stream_sid, "ignoring repeated start event");
            return;
        }

        let stream_id = start.stream_sid;
        self.state
            .sessions
            .create(&stream_id, &start.call_sid, &start.account_sid);
        tracing::info!(
            stream_id = %stream_id,
            call_id = %start.call_sid,
            encoding = start.media_format.as_ref().map(|f| f.encoding.as_str()).unwrap_or("-"),
            "call started"
        );

        let output = CallOutput::new(stream_id.clone(), self.outbound.clone());
        let filler_output = output.clone();
        let sink: AudioSink = Arc::new(move |frame: AudioFrame| filler_output.media(&frame));
        let filler = FillerManager::new(
            self.state.synthesizer.clone(),
            sink,
            self.state.call.filler,
        );
        let call = CallContext {
            stream_id: stream_id.clone(),
            state: self.state.clone(),
            output,
            filler,
            responses: Arc::new(AtomicU64::new(0)),
        };

        let stream = match connect_with_timeout(
            self.state.recognizer.as_ref(),
            self.state.call.connect_timeout,
        )
        .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(stream_id = %stream_id, error = %e, "speech recognizer unavailable, abandoning call");
                call.filler.reset();
                self.state.sessions.delete(&stream_id);
                self.phase = Phase::Stopped;
                return;
            }
        };

        let greeting_call = call.clone();
        let greeting = tokio::spawn(async move {
            let text = greeting_call.state.call.greeting.clone();
            speak(&greeting_call, &text, None).await;
        });
        let dispatcher = tokio::spawn(dispatch_transcripts(call.clone(), stream.events));

        self.phase = Phase::Streaming(ActiveCall {
            call,
            recognizer: stream.handle,
            tasks: vec![greeting, dispatcher],
        });
    }

    fn on_media(&self, media: MediaPayload) {
        let Phase::Streaming(active) = &self.phase else {
            return;
        };
        let bytes = match BASE64.decode(media.payload.as_bytes()) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "dropping media frame with invalid payload");
                return;
            }
        };
        if let Err(e) = active.recognizer.send(&AudioFrame::mulaw(bytes)) {
            tracing::debug!(stream_id = %active.call.stream_id, error = %e, "recognizer not accepting audio");
        }
        self.state.sessions.touch(&active.call.stream_id);
    }

    /// Releases everything the call holds. Runs once; later calls are no-ops.
    pub fn teardown(&mut self, reason: &str) {
        let Phase::Streaming(active) = std::mem::replace(&mut self.phase, Phase::Stopped) else {
            return;
        };

        active.recognizer.close();
        active.call.filler.reset();
        for task in active.tasks {
            task.abort();
        }
        self.state.sessions.delete(&active.call.stream_id);
        tracing::info!(stream_id = %active.call.stream_id, reason, "call ended");
    }
}

impl Drop for MediaStreamHandler {
    fn drop(&mut self) {
        self.teardown("handler dropped");
    }
}

/// Routes recognizer events. Final transcripts start agent turns, which
/// run concurrently so a newer utterance can barge in.
async fn dispatch_transcripts(call: CallContext, mut events: mpsc::Receiver<RecognizerEvent>) {
    let sessions = &call.state.sessions;
    let mut turns = JoinSet::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(RecognizerEvent::Transcript(transcript)) => {
                    if !transcript.is_final {
                        tracing::debug!(stream_id = %call.stream_id, text = %transcript.text, "interim transcript");
                        continue;
                    }
                    let text = transcript.text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    tracing::info!(
                        stream_id = %call.stream_id,
                        text,
                        confidence = transcript.confidence,
                        "final transcript"
                    );

                    if sessions.is_processing(&call.stream_id) {
                        tracing::info!(stream_id = %call.stream_id, "barge-in, abandoning current reply");
                        call.output.clear();
                        call.filler.stop();
                    }

                    let Some(seq) = sessions.begin_turn(&call.stream_id) else {
                        tracing::warn!(stream_id = %call.stream_id, "no session for transcript");
                        continue;
                    };
                    turns.spawn(run_turn(call.clone(), seq, text.to_string()));
                }
                Some(RecognizerEvent::Error(message)) => {
                    tracing::warn!(stream_id = %call.stream_id, error = %message, "speech recognizer error");
                }
                Some(RecognizerEvent::Closed) | None => {
                    tracing::info!(stream_id = %call.stream_id, "speech recognizer closed");
                    break;
                }
            },
            Some(joined) = turns.join_next(), if !turns.is_empty() => {
                log_turn_exit(&call.stream_id, joined);
            }
        }
    }

    while let Some(joined) = turns.join_next().await {
        log_turn_exit(&call.stream_id, joined);
    }
}

fn log_turn_exit(stream_id: &str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(stream_id, "agent turn panicked: {}", e);
        }
    }
}

/// One agent turn. Every side effect is gated on `seq` still being the
/// session's current turn.
async fn run_turn(call: CallContext, seq: u64, text: String) {
    let state = &call.state;
    let sessions = &state.sessions;
    let stream_id = call.stream_id.as_str();

    call.filler.start(FillerContext::Thinking);

    let history = sessions.history(stream_id);
    let facility = match state.facility.get_facility().await {
        Ok(facility) => facility,
        Err(e) => {
            tracing::warn!(stream_id, error = %e, "facility lookup failed, prompting without it");
            None
        }
    };
    let system = build_system_prompt(
        &state.call.prompt,
        facility.as_ref(),
        chrono::Local::now().date_naive(),
    );

    let on_tool_call = |tool: &ToolCall| {
        if sessions.is_current_turn(stream_id, seq) {
            tracing::debug!(stream_id, turn = seq, tool = %tool.name, "tool call in progress");
            call.filler.start(FillerContext::Searching);
        }
    };
    let outcome = state
        .agent
        .run_turn(&system, &history, &text, &on_tool_call)
        .await;

    if !sessions.is_current_turn(stream_id, seq) {
        tracing::info!(stream_id, turn = seq, "discarding superseded turn");
        return;
    }
    call.filler.stop();

    match outcome {
        Ok(outcome) => {
            sessions.append_turns(stream_id, seq, outcome.turns);
            tracing::info!(stream_id, turn = seq, reply = %outcome.reply, "agent reply");
            let spoken = speak(&call, &outcome.reply, Some(seq)).await;
            if sessions.is_current_turn(stream_id, seq) {
                if spoken {
                    let n = call.responses.fetch_add(1, Ordering::Relaxed) + 1;
                    call.output.mark(&format!("response-{n}"));
                } else {
                    speak(&call, &state.call.apology, Some(seq)).await;
                }
            }
        }
        Err(e) => {
            tracing::warn!(stream_id, turn = seq, error = %e, "agent turn failed, apologizing");
            speak(&call, &state.call.apology, Some(seq)).await;
        }
    }

    sessions.finish_turn(stream_id, seq);
}

/// Synthesizes `text` onto the call. With a turn, frames stop flowing as
/// soon as that turn is superseded. Returns false if synthesis failed, in
/// which case nothing was sent.
async fn speak(call: &CallContext, text: &str, turn: Option<u64>) -> bool {
    let output = call.output.clone();
    let sessions = call.state.sessions.clone();
    let stream_id = call.stream_id.clone();
    let mut on_chunk = move |frame: AudioFrame| {
        if turn.map_or(true, |seq| sessions.is_current_turn(&stream_id, seq)) {
            output.media(&frame);
        }
    };

    match call
        .state
        .synthesizer
        .synthesize_stream(text, &mut on_chunk)
        .await
    {
        Ok(frames) => {
            tracing::debug!(stream_id = %call.stream_id, frames, "spoke reply");
            true
        }
        Err(e) => {
            tracing::warn!(stream_id = %call.stream_id, error = %e, "speech synthesis failed");
            false
        }
    }
}

/// Handler for `GET /api/media-stream`.
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut handler = MediaStreamHandler::new(state, tx);

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => handler.handle_text(text.as_str()).await,
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    handler.teardown("socket closed");
    drop(handler);
    send_task.abort();
}
