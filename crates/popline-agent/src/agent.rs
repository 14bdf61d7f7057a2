//! The tool-use loop.

use std::sync::Arc;

use popline_facility::FacilityData;
use popline_types::{HistoryTurn, ToolCall};

use crate::error::AgentError;
use crate::provider::{ProviderResponse, ReasoningProvider, ReasoningRequest, ToolDefinition};
use crate::tools::{self, ToolExecutor};

/// Spoken when the model answers with no text.
pub const EMPTY_REPLY: &str = "申し訳ございません。もう一度お願いできますか。";

/// Result of one completed agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Text to speak.
    pub reply: String,
    /// Turns produced, in order: the user turn, each tool-use / tool-result
    /// pair, then the final assistant turn.
    pub turns: Vec<HistoryTurn>,
}

/// Drives the reasoning provider until it produces a final answer,
/// resolving one tool call per round trip.
pub struct ConversationAgent {
    provider: Arc<dyn ReasoningProvider>,
    executor: ToolExecutor,
    tools: Vec<ToolDefinition>,
    max_tool_rounds: usize,
}

impl ConversationAgent {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        facility: Arc<dyn FacilityData>,
        max_tool_rounds: usize,
    ) -> Self {
        Self {
            provider,
            executor: ToolExecutor::new(facility),
            tools: tools::definitions(),
            max_tool_rounds,
        }
    }

    /// Runs one turn for `user_text` on top of `history`.
    ///
    /// `on_tool_call` fires before each tool executes. A provider failure
    /// aborts the turn; tool failures are fed back to the model.
    pub async fn run_turn(
        &self,
        system: &str,
        history: &[HistoryTurn],
        user_text: &str,
        on_tool_call: &(dyn Fn(&ToolCall) + Send + Sync),
    ) -> Result<TurnOutcome, AgentError> {
        let mut conversation = history.to_vec();
        let start = conversation.len();
        conversation.push(HistoryTurn::user_text(user_text));

        let mut rounds = 0;
        loop {
            let response = self
                .provider
                .complete(ReasoningRequest {
                    system,
                    tools: &self.tools,
                    history: &conversation,
                })
                .await?;

            match response {
                ProviderResponse::ToolUse(call) => {
                    if rounds >= self.max_tool_rounds {
                        return Err(AgentError::ToolRoundsExceeded(self.max_tool_rounds));
                    }
                    rounds += 1;
                    on_tool_call(&call);
                    tracing::info!(tool = %call.name, round = rounds, "tool call");

                    let result = self.executor.execute(&call).await;
                    conversation.push(HistoryTurn::tool_use(call));
                    conversation.push(HistoryTurn::tool_result(result));
                }
                ProviderResponse::Text(text) => {
                    let reply = if text.trim().is_empty() {
                        EMPTY_REPLY.to_string()
                    } else {
                        text
                    };
                    conversation.push(HistoryTurn::assistant_text(reply.clone()));
                    return Ok(TurnOutcome {
                        reply,
                        turns: conversation.split_off(start),
                    });
                }
            }
        }
    }
}
