//! Conversation agent for the popline phone line.
//!
//! A caller's utterance goes to a language model together with the call's
//! history and a small set of facility tools. The model may ask for tool
//! results any number of times (bounded by `max_tool_rounds`) before it
//! produces the reply that gets spoken.

pub mod agent;
pub mod anthropic;
pub mod config;
pub mod error;
pub mod prompt;
pub mod provider;
pub mod tools;

pub use agent::{ConversationAgent, TurnOutcome, EMPTY_REPLY};
pub use anthropic::AnthropicProvider;
pub use config::ReasoningConfig;
pub use error::AgentError;
pub use prompt::{build_system_prompt, PromptSettings};
pub use provider::{ProviderResponse, ReasoningProvider, ReasoningRequest, ToolDefinition};
pub use tools::ToolExecutor;
