//! OpenAI-compatible chat-completions backend.
//!
//! Supports tool use (function calling) in the `tools` / `tool_calls` format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::translate::require_object_root;
use super::{ModelBackend, ToolDeclaration};
use crate::error::{BridgeError, BridgeResult};
use crate::types::*;

const BACKEND: &str = "openai";

/// Chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

/// Function entry of the `tools` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration for OpenAiFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Value {
        &self.parameters
    }
}

// -- Request/response types --------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<MessagePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolPayload<'a>>>,
    max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct MessagePayload {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCallPayload>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ToolPayload<'a> {
    r#type: &'static str,
    function: &'a OpenAiFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ToolCallPayload {
    id: String,
    r#type: String,
    function: FunctionCallPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCallPayload {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallPayload>,
}

impl OpenAiBackend {
    pub fn new(base_url: &str, api_key: &str, model: &str, max_tokens: u32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            http: reqwest::Client::new(),
        }
    }

    pub(crate) fn build_request<'a>(
        &'a self,
        turns: &[ConversationTurn],
        declarations: &'a [OpenAiFunction],
    ) -> ChatRequest<'a> {
        let tools = if declarations.is_empty() {
            None
        } else {
            Some(
                declarations
                    .iter()
                    .map(|function| ToolPayload {
                        r#type: "function",
                        function,
                    })
                    .collect(),
            )
        };

        ChatRequest {
            model: &self.model,
            messages: render_messages(turns),
            tools,
            max_tokens: self.max_tokens,
        }
    }
}

/// Render the turn history as chat messages.
///
/// A tool call is attached to the assistant message right before it when
/// that message has no pending calls, so text and the call it introduces
/// travel together; each result becomes a `tool` message keyed by call id.
pub(crate) fn render_messages(turns: &[ConversationTurn]) -> Vec<MessagePayload> {
    let mut messages: Vec<MessagePayload> = Vec::with_capacity(turns.len());

    for turn in turns {
        match &turn.content {
            TurnContent::Text { text } => messages.push(MessagePayload {
                role: match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                    TurnRole::Tool => "tool",
                },
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            TurnContent::ToolCall { call } => {
                let payload = ToolCallPayload {
                    id: call.id.clone(),
                    r#type: "function".into(),
                    function: FunctionCallPayload {
                        name: call.name.clone(),
                        arguments: call.arguments_json(),
                    },
                };
                match messages.last_mut() {
                    Some(last) if last.role == "assistant" && last.tool_calls.is_none() => {
                        last.tool_calls = Some(vec![payload]);
                    }
                    _ => messages.push(MessagePayload {
                        role: "assistant",
                        content: None,
                        tool_calls: Some(vec![payload]),
                        tool_call_id: None,
                    }),
                }
            }
            TurnContent::ToolResult { result } => {
                let text = result.content_text();
                messages.push(MessagePayload {
                    role: "tool",
                    content: Some(if result.is_error {
                        format!("Error: {text}")
                    } else {
                        text
                    }),
                    tool_calls: None,
                    tool_call_id: Some(result.call.id.clone()),
                });
            }
        }
    }

    messages
}

/// Classify the first choice into ordered segments: text, then tool calls.
pub(crate) fn parse_response(body: ChatResponse) -> BridgeResult<Vec<Segment>> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BridgeError::ModelBackend("response contained no choices".into()))?;

    let mut segments = Vec::new();

    if let Some(text) = choice.message.content.filter(|t| !t.trim().is_empty()) {
        segments.push(Segment::Text(text));
    }

    for tc in choice.message.tool_calls {
        let arguments = parse_arguments(&tc.function.name, &tc.function.arguments)?;
        segments.push(Segment::ToolCall(ToolCallRequest::with_id(
            tc.id,
            tc.function.name,
            arguments,
        )));
    }

    Ok(segments)
}

fn parse_arguments(tool: &str, raw: &str) -> BridgeResult<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(BridgeError::ModelBackend(format!(
            "arguments for '{tool}' are not a JSON object: {other}"
        ))),
        Err(e) => Err(BridgeError::ModelBackend(format!(
            "arguments for '{tool}' are not valid JSON: {e}"
        ))),
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    type Declaration = OpenAiFunction;

    fn name(&self) -> &'static str {
        BACKEND
    }

    fn declare(&self, descriptor: &ToolDescriptor) -> BridgeResult<OpenAiFunction> {
        require_object_root(descriptor, BACKEND)?;
        Ok(OpenAiFunction {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters: descriptor.input_schema.clone(),
        })
    }

    async fn generate(
        &self,
        turns: &[ConversationTurn],
        declarations: &[OpenAiFunction],
    ) -> BridgeResult<Vec<Segment>> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let request = self.build_request(turns, declarations);

        debug!(
            "Inference request to model {} ({} messages, {} tools)",
            self.model,
            request.messages.len(),
            declarations.len()
        );

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| BridgeError::ModelBackend(format!("inference request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::ModelBackend(format!(
                "inference failed ({status}): {body}"
            )));
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::ModelBackend(format!("failed to parse inference response: {e}")))?;

        parse_response(body)
    }
}
