//! Error taxonomy for the conversation core.

use thiserror::Error;

/// Errors raised by the tool-server channel, the model backends and the
/// conversation engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Channel to the tool server is down, or it answered with something
    /// that is not a valid listing / response.
    #[error("tool server unavailable: {0}")]
    ServerUnavailable(String),

    /// The model asked for a tool that was not declared this round.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool server failed while executing a known tool.
    #[error("tool '{tool}' failed: {}", payload_text(.payload))]
    ToolExecution {
        tool: String,
        payload: serde_json::Value,
    },

    /// A tool's input schema cannot be expressed for the target backend.
    #[error("tool '{tool}' has a schema the {backend} backend cannot express: {reason}")]
    UnsupportedSchema {
        tool: String,
        backend: &'static str,
        reason: String,
    },

    /// The request to the model failed or its answer could not be read.
    #[error("model backend error: {0}")]
    ModelBackend(String),

    /// The model kept requesting tools past the configured round limit.
    #[error("round limit of {limit} exceeded")]
    RoundLimitExceeded { limit: usize, partial: String },

    /// The user interrupted the query between two rounds.
    #[error("query cancelled after {rounds} round(s)")]
    Cancelled { rounds: usize, partial: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    /// Output accumulated before the query stopped, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            Self::RoundLimitExceeded { partial, .. } | Self::Cancelled { partial, .. } => {
                Some(partial)
            }
            _ => None,
        }
    }
}

/// Server error payload as text: strings verbatim, anything else as JSON.
pub fn payload_text(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_output_only_for_interrupted_queries() {
        let err = BridgeError::RoundLimitExceeded {
            limit: 3,
            partial: "so far".into(),
        };
        assert_eq!(err.partial_output(), Some("so far"));
        assert_eq!(err.to_string(), "round limit of 3 exceeded");

        let err = BridgeError::ModelBackend("boom".into());
        assert_eq!(err.partial_output(), None);
    }

    #[test]
    fn tool_execution_message_includes_payload() {
        let err = BridgeError::ToolExecution {
            tool: "get_weather".into(),
            payload: serde_json::json!("city not found"),
        };
        assert_eq!(err.to_string(), "tool 'get_weather' failed: city not found");

        let err = BridgeError::ToolExecution {
            tool: "get_weather".into(),
            payload: serde_json::json!({ "code": -32603 }),
        };
        assert_eq!(err.to_string(), r#"tool 'get_weather' failed: {"code":-32603}"#);
    }
}
