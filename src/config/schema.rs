//! Configuration schema for config.toml.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model provider the bridge talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    OpenAi,
    Gemini,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown backend '{other}' (expected openai or gemini)")),
        }
    }
}

impl BackendKind {
    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Which model backend to target.
    pub backend: BackendKind,

    /// Chat-completions model for the OpenAI backend.
    pub openai_model: String,

    /// Model for the Gemini backend.
    pub gemini_model: String,

    /// Base URL of the OpenAI-compatible API.
    pub openai_api_url: String,

    /// Base URL of the Gemini API.
    pub gemini_api_url: String,

    /// Maximum model rounds per query before giving up.
    pub max_rounds: usize,

    /// Maximum tokens per model response.
    pub max_tokens: u32,

    /// Timeout for a single tool-server request, in seconds.
    pub request_timeout_secs: u64,

    /// Interpreter used for `.py` tool servers.
    pub python_command: String,

    /// Interpreter used for `.js` tool servers.
    pub node_command: String,

    /// Log level (debug, info, warn, error).
    pub log_level: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Gemini,
            openai_model: "gpt-4o".into(),
            gemini_model: "gemini-2.0-flash".into(),
            openai_api_url: "https://api.openai.com".into(),
            gemini_api_url: "https://generativelanguage.googleapis.com".into(),
            max_rounds: 10,
            max_tokens: 4096,
            request_timeout_secs: 60,
            python_command: "python".into(),
            node_command: "node".into(),
            log_level: "info".into(),
        }
    }
}

impl BridgeConfig {
    /// Model name for the selected backend.
    pub fn effective_model(&self) -> &str {
        match self.backend {
            BackendKind::OpenAi => &self.openai_model,
            BackendKind::Gemini => &self.gemini_model,
        }
    }

    /// Override the model of the selected backend.
    pub fn set_model(&mut self, model: impl Into<String>) {
        match self.backend {
            BackendKind::OpenAi => self.openai_model = model.into(),
            BackendKind::Gemini => self.gemini_model = model.into(),
        }
    }
}
