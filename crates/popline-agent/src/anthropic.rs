//! Anthropic messages-API provider.

use async_trait::async_trait;
use popline_types::{HistoryTurn, Role, ToolCall, TurnContent};
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::ReasoningConfig;
use crate::error::AgentError;
use crate::provider::{ProviderResponse, ReasoningProvider, ReasoningRequest, ToolDefinition};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: ReasoningConfig,
}

impl AnthropicProvider {
    pub fn new(config: ReasoningConfig) -> Result<Self, AgentError> {
        if config.api_key.is_empty() {
            tracing::warn!("reasoning provider created without an api key");
        }
        Ok(Self {
            client: Client::builder().build()?,
            config,
        })
    }

    fn payload(&self, request: &ReasoningRequest<'_>) -> Value {
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "messages": history_to_messages(request.history),
        });
        if !request.tools.is_empty() {
            payload["tools"] = Value::Array(request.tools.iter().map(tool_to_anthropic).collect());
        }
        payload
    }
}

#[async_trait]
impl ReasoningProvider for AnthropicProvider {
    async fn complete(&self, request: ReasoningRequest<'_>) -> Result<ProviderResponse, AgentError> {
        if self.config.api_key.is_empty() {
            return Err(AgentError::Config(
                "reasoning api_key is not set".to_string(),
            ));
        }
        if request.history.is_empty() {
            return Err(AgentError::Config(
                "at least one message is required".to_string(),
            ));
        }

        tracing::debug!(
            model = %self.config.model,
            messages = request.history.len(),
            tools = request.tools.len(),
            "sending reasoning request"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.payload(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 429 {
                return Err(AgentError::RateLimited);
            }
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        parse_response(&body)
    }
}

fn tool_to_anthropic(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

/// Converts history to API messages. Consecutive turns of the same role are
/// merged into one message so roles always alternate.
fn history_to_messages(history: &[HistoryTurn]) -> Vec<Value> {
    let mut messages: Vec<(Role, Vec<Value>)> = Vec::new();

    for turn in history {
        let block = match &turn.content {
            TurnContent::Text { text } => json!({ "type": "text", "text": text }),
            TurnContent::ToolUse { call } => json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": call.arguments,
            }),
            TurnContent::ToolResult { result } => json!({
                "type": "tool_result",
                "tool_use_id": result.tool_call_id,
                "content": result.content,
                "is_error": result.is_error,
            }),
        };

        if let Some((role, blocks)) = messages.last_mut() {
            if *role == turn.role {
                blocks.push(block);
                continue;
            }
        }
        messages.push((turn.role, vec![block]));
    }

    messages
        .into_iter()
        .map(|(role, content)| json!({ "role": role.as_str(), "content": content }))
        .collect()
}

/// Reads the first tool_use block when the model stopped for a tool,
/// otherwise the concatenated text blocks.
fn parse_response(body: &Value) -> Result<ProviderResponse, AgentError> {
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| AgentError::Parse("response has no content array".to_string()))?;

    if body["stop_reason"].as_str() == Some("tool_use") {
        let call = blocks.iter().find_map(|block| {
            if block["type"].as_str()? != "tool_use" {
                return None;
            }
            Some(ToolCall {
                id: block["id"].as_str()?.to_string(),
                name: block["name"].as_str()?.to_string(),
                arguments: block["input"].clone(),
            })
        });
        if let Some(call) = call {
            return Ok(ProviderResponse::ToolUse(call));
        }
    }

    let text = blocks
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect::<String>();
    Ok(ProviderResponse::Text(text))
}
