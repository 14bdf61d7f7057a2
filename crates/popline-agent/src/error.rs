use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Reasoning request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Reasoning provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Reasoning provider rate limited")]
    RateLimited,

    #[error("Malformed provider response: {0}")]
    Parse(String),

    #[error("Tool loop exceeded {0} rounds")]
    ToolRoundsExceeded(usize),
}
