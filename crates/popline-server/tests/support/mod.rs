#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::{SinkExt, StreamExt};
use popline_agent::{
    AgentError, ConversationAgent, ProviderResponse, ReasoningProvider, ReasoningRequest,
};
use popline_facility::{FacilityData, FacilityError};
use popline_server::media_stream::CallSettings;
use popline_server::session::SessionRegistry;
use popline_server::{app, AppState};
use popline_types::{
    Facility, HistoryTurn, Inquiry, NewInquiry, Role, Section, SectionFilter, SectionStatus,
    ToolCall, Transcript,
};
use popline_voice::{
    FillerTiming, PcmAudio, RecognizerCommand, RecognizerEvent, RecognizerHandle,
    RecognizerStream, SpeechRecognizer, SpeechSynthesizer, VoiceError,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const GREETING: &str = "テスト案内です。";
pub const APOLOGY: &str = "テスト用のお詫びです。";

/// Long enough that fillers never fire during a test.
pub const QUIET_FILLER: FillerTiming = FillerTiming {
    initial_delay: Duration::from_secs(60),
    repeat_interval: Duration::from_secs(60),
};

// ── Recognizer ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerMode {
    Ready,
    /// `connect` never completes.
    Hang,
}

/// Hands each opened session to the test.
pub struct FakeRecognizer {
    mode: RecognizerMode,
    sessions: mpsc::UnboundedSender<FakeSession>,
}

pub struct FakeSession {
    pub commands: mpsc::Receiver<RecognizerCommand>,
    pub events: mpsc::Sender<RecognizerEvent>,
}

impl FakeSession {
    pub async fn say(&self, text: &str) {
        self.transcript(text, true).await;
    }

    pub async fn transcript(&self, text: &str, is_final: bool) {
        self.events
            .send(RecognizerEvent::Transcript(Transcript {
                text: text.to_string(),
                is_final,
                confidence: 0.95,
            }))
            .await
            .unwrap();
    }

    /// Next audio payload, skipping nothing.
    pub async fn next_command(&mut self) -> RecognizerCommand {
        tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
            .await
            .expect("timed out waiting for recognizer command")
            .expect("recognizer command channel closed")
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn connect(&self) -> Result<RecognizerStream, VoiceError> {
        if self.mode == RecognizerMode::Hang {
            std::future::pending::<()>().await;
        }
        let (handle, commands) = RecognizerHandle::channel(64);
        let (events_tx, events) = mpsc::channel(16);
        let _ = self.sessions.send(FakeSession {
            commands,
            events: events_tx,
        });
        Ok(RecognizerStream { handle, events })
    }
}

// ── Synthesizer ──

/// Every utterance becomes two 160-byte frames. Text containing `合成失敗`
/// fails to synthesize.
#[derive(Default)]
pub struct FakeSynthesizer {
    pub spoken: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn fetch_pcm(&self, text: &str) -> Result<PcmAudio, VoiceError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if text.contains("合成失敗") {
            return Err(VoiceError::Tts("provider returned 503".into()));
        }
        Ok(PcmAudio {
            samples: vec![0; 320],
            sample_rate: 8000,
        })
    }
}

// ── Reasoning ──

/// Answers by keyword:
/// - `待って`: blocks until `release` is notified, then answers
/// - `故障`: provider error
/// - `空き`: one availability tool call, then an answer
/// - anything else: echoes the utterance
#[derive(Default)]
pub struct FakeProvider {
    pub requests: Mutex<Vec<String>>,
    pub entered: Notify,
    pub release: Notify,
}

impl FakeProvider {
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn last_user_text(history: &[HistoryTurn]) -> String {
    history
        .iter()
        .rev()
        .find(|t| t.role == Role::User && t.text().is_some())
        .and_then(|t| t.text())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ReasoningProvider for FakeProvider {
    async fn complete(&self, request: ReasoningRequest<'_>) -> Result<ProviderResponse, AgentError> {
        let text = last_user_text(request.history);
        self.requests.lock().unwrap().push(text.clone());

        if text.contains("待って") {
            self.entered.notify_one();
            self.release.notified().await;
            return Ok(ProviderResponse::Text("遅れた回答です".into()));
        }
        if text.contains("故障") {
            return Err(AgentError::Api {
                status: 500,
                message: "overloaded".into(),
            });
        }
        if text.contains("空き") {
            let answered = request.history.last().is_some_and(|t| t.is_tool_result());
            if !answered {
                return Ok(ProviderResponse::ToolUse(ToolCall {
                    id: "toolu_1".into(),
                    name: "check_section_availability".into(),
                    arguments: json!({
                        "section_name": "1F-A",
                        "start_date": "2026-03-01",
                        "end_date": "2026-03-03"
                    }),
                }));
            }
            return Ok(ProviderResponse::Text("1F-Aは空いております".into()));
        }
        Ok(ProviderResponse::Text(format!("{text}について承りました")))
    }
}

// ── Facility ──

#[derive(Default)]
pub struct FakeFacility {
    pub inquiries: Mutex<Vec<NewInquiry>>,
}

fn section() -> Section {
    Section {
        id: "sec-1".into(),
        facility_id: "fac-1".into(),
        name: "1F-A".into(),
        floor: 1,
        area: 45.0,
        rent_price: 15_000,
        category: "物販".into(),
        status: SectionStatus::Active,
        features: vec!["搬入口あり".into()],
        description: "正面入口すぐの区画".into(),
    }
}

#[async_trait]
impl FacilityData for FakeFacility {
    async fn list_sections(&self, _filter: &SectionFilter) -> Result<Vec<Section>, FacilityError> {
        Ok(vec![section()])
    }

    async fn get_section_by_name(&self, name: &str) -> Result<Option<Section>, FacilityError> {
        Ok(section().name.contains(name).then(section))
    }

    async fn is_section_available(
        &self,
        _section_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<bool, FacilityError> {
        Ok(true)
    }

    async fn create_inquiry(&self, inquiry: NewInquiry) -> Result<Inquiry, FacilityError> {
        self.inquiries.lock().unwrap().push(inquiry.clone());
        Ok(Inquiry {
            id: "inq-1".into(),
            section_id: inquiry.section_id,
            caller_name: inquiry.caller_name,
            caller_phone: inquiry.caller_phone,
            inquiry_type: inquiry.inquiry_type,
            message: inquiry.message,
            status: "new".into(),
            created_at: "2026-01-01 00:00:00".into(),
        })
    }

    async fn get_facility(&self) -> Result<Option<Facility>, FacilityError> {
        Ok(Some(Facility {
            id: "fac-1".into(),
            name: "テストモール".into(),
            address: "東京都".into(),
            phone: "03-0000-0000".into(),
            hours: "10:00〜20:00".into(),
        }))
    }
}

// ── Harness ──

pub struct Harness {
    pub state: AppState,
    pub sessions: Arc<SessionRegistry>,
    pub synthesizer: Arc<FakeSynthesizer>,
    pub provider: Arc<FakeProvider>,
    pub recognizer_sessions: mpsc::UnboundedReceiver<FakeSession>,
}

impl Harness {
    pub fn new(mode: RecognizerMode) -> Self {
        Self::with_public_url(mode, None)
    }

    pub fn with_public_url(mode: RecognizerMode, public_url: Option<&str>) -> Self {
        Self::build(mode, public_url, QUIET_FILLER)
    }

    pub fn with_filler(mode: RecognizerMode, filler: FillerTiming) -> Self {
        Self::build(mode, None, filler)
    }

    fn build(mode: RecognizerMode, public_url: Option<&str>, filler: FillerTiming) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(SessionRegistry::new());
        let synthesizer = Arc::new(FakeSynthesizer::default());
        let provider = Arc::new(FakeProvider::default());
        let facility = Arc::new(FakeFacility::default());
        let agent = Arc::new(ConversationAgent::new(provider.clone(), facility.clone(), 4));

        let state = AppState {
            sessions: sessions.clone(),
            facility,
            recognizer: Arc::new(FakeRecognizer { mode, sessions: tx }),
            synthesizer: synthesizer.clone(),
            agent,
            call: CallSettings {
                greeting: GREETING.into(),
                apology: APOLOGY.into(),
                filler,
                connect_timeout: Duration::from_millis(200),
                ..CallSettings::default()
            },
            public_url: public_url.map(str::to_string),
        };

        Self {
            state,
            sessions,
            synthesizer,
            provider,
            recognizer_sessions: rx,
        }
    }

    /// Serves the router on an ephemeral port.
    pub async fn serve(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = app(self.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    pub async fn next_recognizer_session(&mut self) -> FakeSession {
        tokio::time::timeout(Duration::from_secs(5), self.recognizer_sessions.recv())
            .await
            .expect("timed out waiting for recognizer connect")
            .expect("recognizer closed")
    }

    /// Polls until `check` holds.
    pub async fn wait_until(&self, what: &str, check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }
}

// ── Carrier side ──

pub struct Carrier {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl Carrier {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/api/media-stream"))
            .await
            .unwrap();
        Self { ws }
    }

    pub async fn send(&mut self, event: Value) {
        self.ws
            .send(Message::Text(event.to_string().into()))
            .await
            .unwrap();
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    pub async fn start(&mut self, stream_sid: &str) {
        self.send(json!({"event": "connected", "protocol": "Call", "version": "1.0.0"}))
            .await;
        self.send(json!({
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "streamSid": stream_sid,
                "callSid": "CA0001",
                "accountSid": "AC0001",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            },
            "streamSid": stream_sid
        }))
        .await;
    }

    /// Next event from the server, or `None` if nothing arrives in `wait`.
    pub async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        loop {
            let msg = tokio::time::timeout(wait, self.ws.next()).await.ok()??.ok()?;
            if let Message::Text(text) = msg {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
        }
    }

    pub async fn recv(&mut self) -> Value {
        self.recv_within(Duration::from_secs(5))
            .await
            .expect("timed out waiting for server event")
    }

    /// Reads `n` media events, asserting nothing else arrives in between.
    pub async fn expect_media(&mut self, n: usize) {
        for _ in 0..n {
            let event = self.recv().await;
            assert_eq!(event["event"], "media", "unexpected event: {event}");
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
