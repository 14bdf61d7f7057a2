//! Conversation history, tool invocations and transcript events.

use serde::{Deserialize, Serialize};

/// Speaker of a history turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The caller.
    User,
    /// The voice agent.
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A structured request from the reasoning provider to run a named operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned identifier, echoed back in the matching [`ToolResult`].
    pub id: String,
    pub name: String,
    /// Argument map. Values are JSON primitives in practice.
    pub arguments: serde_json::Value,
}

/// Serialized outcome of a tool invocation, returned to the reasoning provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    /// JSON-serialized result body.
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Payload of a single history turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolUse { call: ToolCall },
    ToolResult { result: ToolResult },
}

/// One role-tagged entry of a call's conversation history.
///
/// History is append-only: turns are never reordered or retracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    #[serde(flatten)]
    pub content: TurnContent,
}

impl HistoryTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text { text: text.into() },
        }
    }

    /// The assistant turn requesting a tool invocation.
    pub fn tool_use(call: ToolCall) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::ToolUse { call },
        }
    }

    /// The turn carrying a tool's result back to the model. Result turns are
    /// attributed to the user side, matching the messages-API convention.
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::ToolResult { result },
        }
    }

    /// Plain text of the turn, if it is a text turn.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.content, TurnContent::ToolResult { .. })
    }
}

/// A speech recognition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
}

/// Bias for which filler phrase pool is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillerContext {
    Thinking,
    Searching,
    Processing,
    Waiting,
}

impl FillerContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Thinking => "thinking",
            Self::Searching => "searching",
            Self::Processing => "processing",
            Self::Waiting => "waiting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_turn_serializes_flat() {
        let turn = HistoryTurn::user_text("こんにちは");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["kind"], "text");
        assert_eq!(json["text"], "こんにちは");

        let back: HistoryTurn = serde_json::from_value(json).unwrap();
        assert_eq!(back, turn);
    }

    #[test]
    fn tool_result_turns_belong_to_user_side() {
        let turn = HistoryTurn::tool_result(ToolResult {
            tool_call_id: "toolu_1".into(),
            content: "{}".into(),
            is_error: false,
        });
        assert_eq!(turn.role, Role::User);
        assert!(turn.is_tool_result());
        assert!(turn.text().is_none());
    }
}
