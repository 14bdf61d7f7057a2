//! Reasoning provider contract.

use async_trait::async_trait;
use popline_types::{HistoryTurn, ToolCall};
use serde::Serialize;

use crate::error::AgentError;

/// A tool the model may invoke, described by a JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One round trip to the model.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningRequest<'a> {
    pub system: &'a str,
    pub tools: &'a [ToolDefinition],
    pub history: &'a [HistoryTurn],
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    /// The model needs a tool result before it can answer.
    ToolUse(ToolCall),
    /// Final answer for this turn.
    Text(String),
}

#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn complete(&self, request: ReasoningRequest<'_>) -> Result<ProviderResponse, AgentError>;
}
