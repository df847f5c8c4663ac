//! Shared types used across the bridge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Tool discovery
// ---------------------------------------------------------------------------

/// A tool as advertised by the tool server's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

/// Schema used when a server lists a tool without `inputSchema`.
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// Payload of a single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    ToolCall { call: ToolCallRequest },
    ToolResult { result: ToolCallResult },
}

/// One entry of the message history sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: TurnContent,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: TurnContent::Text { text: text.into() },
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::Text { text: text.into() },
        }
    }

    /// The assistant turn recording that the model asked for `call`.
    pub fn tool_call(call: ToolCallRequest) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: TurnContent::ToolCall { call },
        }
    }

    pub fn tool_result(result: ToolCallResult) -> Self {
        Self {
            role: TurnRole::Tool,
            content: TurnContent::ToolResult { result },
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Backend call id, or a locally generated ULID when the backend has none.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    /// True when `id` was generated here and must not be echoed to the backend.
    #[serde(default)]
    pub generated_id: bool,
    /// Opaque signature the backend attached to the call, echoed back in history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            name: name.into(),
            arguments,
            generated_id: true,
            signature: None,
        }
    }

    /// A call carrying the backend's own id.
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            generated_id: false,
            signature: None,
        }
    }

    /// The backend's id, if it supplied one.
    pub fn backend_id(&self) -> Option<&str> {
        (!self.generated_id).then_some(self.id.as_str())
    }

    /// Arguments rendered as compact JSON for annotations and logs.
    pub fn arguments_json(&self) -> String {
        Value::Object(self.arguments.clone()).to_string()
    }
}

/// Outcome of a tool call, successful or not, as fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call: ToolCallRequest,
    pub content: Value,
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn success(call: ToolCallRequest, content: Value) -> Self {
        Self {
            call,
            content,
            is_error: false,
        }
    }

    pub fn failure(call: ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            call,
            content: Value::String(message.into()),
            is_error: true,
        }
    }

    /// Content as plain text: strings verbatim, anything else as JSON.
    pub fn content_text(&self) -> String {
        crate::error::payload_text(&self.content)
    }
}

/// One unit of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    ToolCall(ToolCallRequest),
}

/// Final answer of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Text segments and tool-call annotations, newline-joined in order.
    pub text: String,
    /// Number of model rounds the query took.
    pub rounds: usize,
    /// Number of tool calls dispatched across all rounds.
    pub tool_calls: usize,
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_defaults_missing_fields() {
        let d: ToolDescriptor = serde_json::from_value(json!({ "name": "ping" })).unwrap();
        assert_eq!(d.name, "ping");
        assert_eq!(d.description, "");
        assert_eq!(d.input_schema, empty_object_schema());
    }

    #[test]
    fn result_content_text_keeps_strings_verbatim() {
        let call = ToolCallRequest::new("t", Map::new());
        let ok = ToolCallResult::success(call.clone(), json!("Sunny, 20C"));
        assert_eq!(ok.content_text(), "Sunny, 20C");

        let structured = ToolCallResult::success(call, json!({ "temp": 20 }));
        assert_eq!(structured.content_text(), r#"{"temp":20}"#);
    }

    #[test]
    fn generated_call_ids_are_unique() {
        let a = ToolCallRequest::new("t", Map::new());
        let b = ToolCallRequest::new("t", Map::new());
        assert_ne!(a.id, b.id);
    }
}
