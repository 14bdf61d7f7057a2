//! Popline server library logic.

pub mod api;
pub mod api_chat;
pub mod api_twilio;
pub mod config;
pub mod media_stream;
pub mod session;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use media_stream::CallSettings;
use popline_agent::ConversationAgent;
use popline_facility::FacilityData;
use popline_voice::{SpeechRecognizer, SpeechSynthesizer};
use serde_json::{json, Value};
use session::SessionRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Active calls.
    pub sessions: Arc<SessionRegistry>,
    /// Facility records the agent's tools read and write.
    pub facility: Arc<dyn FacilityData>,
    /// Speech-to-text, one session per call.
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// Text-to-speech, shared by replies and fillers.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub agent: Arc<ConversationAgent>,
    pub call: CallSettings,
    /// Externally reachable base URL, if configured.
    pub public_url: Option<String>,
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.sessions.len(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/media-stream", get(media_stream::media_stream_handler))
        .route("/api/twilio/stream", post(api_twilio::stream_twiml_handler))
        .route("/api/chat", post(api_chat::chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
