use serde::{Deserialize, Serialize};
use std::fmt;

fn default_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_max_tool_rounds() -> usize {
    8
}

/// Language-model provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Tool invocations allowed before a turn is abandoned.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

impl fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_table_keeps_defaults_and_hides_key() {
        let cfg: ReasoningConfig =
            toml::from_str("api_key = \"sk-ant-secret\"\nmax_tool_rounds = 3").unwrap();
        assert_eq!(cfg.max_tool_rounds, 3);
        assert_eq!(cfg.max_tokens, 512);
        assert!(cfg.endpoint.ends_with("/v1/messages"));
        assert!(!format!("{cfg:?}").contains("sk-ant-secret"));
        assert!(!serde_json::to_string(&cfg).unwrap().contains("sk-ant-secret"));
    }
}
