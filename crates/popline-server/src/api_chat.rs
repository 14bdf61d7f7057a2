//! Text chat over the same agent the phone line uses.

use std::sync::Arc;

use axum::{extract::Extension, Json};
use popline_agent::build_system_prompt;
use popline_types::{HistoryTurn, ToolCall};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Conversation so far, as returned by the previous response.
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub text: String,
    pub history: Vec<HistoryTurn>,
}

/// Handler for `POST /api/chat`.
pub async fn chat_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = payload.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }

    let facility = state
        .facility
        .get_facility()
        .await
        .map_err(|e| ApiError::InternalServerError(format!("facility lookup failed: {}", e)))?;
    let system = build_system_prompt(
        &state.call.prompt,
        facility.as_ref(),
        chrono::Local::now().date_naive(),
    );

    let on_tool_call = |tool: &ToolCall| {
        tracing::debug!(tool = %tool.name, "chat tool call");
    };
    let outcome = state
        .agent
        .run_turn(&system, &payload.history, message, &on_tool_call)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "chat turn failed");
            ApiError::from(e)
        })?;

    let mut history = payload.history;
    history.extend(outcome.turns);
    Ok(Json(ChatResponse {
        text: outcome.reply,
        history,
    }))
}
