//! Server configuration loading from file and environment variables.

use popline_agent::{PromptSettings, ReasoningConfig};
use popline_voice::{FillerTiming, RecognizerConfig, SynthesizerConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use crate::media_stream::CallSettings;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub sessions: SessionConfig,

    #[serde(default)]
    pub filler: FillerConfig,

    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub recognizer: RecognizerConfig,

    #[serde(default)]
    pub synthesizer: SynthesizerConfig,

    #[serde(default)]
    pub reasoning: ReasoningConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (e.g. `https://line.example.com`).
    /// When set it is used for the media-stream URL handed to the carrier.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "popline_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Call session bookkeeping.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are evicted by the sweep.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FillerConfig {
    #[serde(default = "default_filler_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_filler_repeat_interval_ms")]
    pub repeat_interval_ms: u64,
}

/// Fixed call wording.
#[derive(Debug, Clone, Deserialize)]
pub struct CallConfig {
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Spoken when a turn fails.
    #[serde(default = "default_apology")]
    pub apology: String,

    #[serde(default = "default_facility_label")]
    pub facility_label: String,

    #[serde(default = "default_reply_language")]
    pub reply_language: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3005
}

fn default_db_path() -> String {
    "popline.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_filler_initial_delay_ms() -> u64 {
    2000
}

fn default_filler_repeat_interval_ms() -> u64 {
    4000
}

fn default_greeting() -> String {
    "つくにんモール渋谷テナント案内です。ご用件をお話しください。".to_string()
}

fn default_apology() -> String {
    "申し訳ございません。もう一度お話しいただけますか。".to_string()
}

fn default_facility_label() -> String {
    PromptSettings::default().facility_label
}

fn default_reply_language() -> String {
    PromptSettings::default().reply_language
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for FillerConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_filler_initial_delay_ms(),
            repeat_interval_ms: default_filler_repeat_interval_ms(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            apology: default_apology(),
            facility_label: default_facility_label(),
            reply_language: default_reply_language(),
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl FillerConfig {
    pub fn timing(&self) -> FillerTiming {
        FillerTiming {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            repeat_interval: Duration::from_millis(self.repeat_interval_ms),
        }
    }
}

impl Config {
    /// Per-call behavior assembled from the `[call]`, `[filler]` and
    /// `[recognizer]` sections.
    pub fn call_settings(&self) -> CallSettings {
        CallSettings {
            greeting: self.call.greeting.clone(),
            apology: self.call.apology.clone(),
            prompt: PromptSettings {
                facility_label: self.call.facility_label.clone(),
                reply_language: self.call.reply_language.clone(),
            },
            filler: self.filler.timing(),
            connect_timeout: self.recognizer.connect_timeout(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `POPLINE_HOST` overrides `server.host`
/// - `POPLINE_PORT` overrides `server.port`
/// - `POPLINE_PUBLIC_URL` overrides `server.public_url`
/// - `POPLINE_DB_PATH` overrides `database.path`
/// - `POPLINE_LOG_LEVEL` overrides `logging.level`
/// - `POPLINE_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `DEEPGRAM_API_KEY`, `ELEVENLABS_API_KEY`, `ELEVENLABS_VOICE_ID` and
///   `ANTHROPIC_API_KEY` fill in provider credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("POPLINE_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("POPLINE_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(url) = var("POPLINE_PUBLIC_URL") {
        config.server.public_url = Some(url).filter(|u| !u.trim().is_empty());
    }
    if let Some(db_path) = var("POPLINE_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("POPLINE_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("POPLINE_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if let Some(key) = var("DEEPGRAM_API_KEY") {
        config.recognizer.api_key = key;
    }
    if let Some(key) = var("ELEVENLABS_API_KEY") {
        config.synthesizer.api_key = key;
    }
    if let Some(voice) = var("ELEVENLABS_VOICE_ID") {
        config.synthesizer.voice_id = voice;
    }
    if let Some(key) = var("ANTHROPIC_API_KEY") {
        config.reasoning.api_key = key;
    }
}
