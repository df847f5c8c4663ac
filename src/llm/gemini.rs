//! Gemini `generateContent` backend with function declarations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::translate::{find_in_schema, find_keyword, require_object_root};
use super::{ModelBackend, ToolDeclaration};
use crate::error::{BridgeError, BridgeResult};
use crate::types::*;

const BACKEND: &str = "gemini";

/// Keywords Gemini cannot take in either declaration field.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "definitions",
    "allOf",
    "not",
    "if",
    "then",
    "else",
    "patternProperties",
    "const",
];

/// JSON Schema keywords outside the OpenAPI subset of `parameters`. A schema
/// using any of them is sent as `parametersJsonSchema` instead.
const JSON_SCHEMA_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "$ref",
    "$defs",
    "additionalProperties",
    "oneOf",
];

/// Gemini API client.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    http: reqwest::Client,
}

/// Entry of `tools[].functionDeclarations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub parameters: Parameters,
}

/// The input schema, under the field Gemini reads it from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Parameters {
    /// OpenAPI subset schema.
    #[serde(rename = "parameters")]
    OpenApi(Value),
    /// Full JSON Schema.
    #[serde(rename = "parametersJsonSchema")]
    JsonSchema(Value),
}

impl Parameters {
    pub fn schema(&self) -> &Value {
        match self {
            Self::OpenApi(schema) | Self::JsonSchema(schema) => schema,
        }
    }
}

impl ToolDeclaration for FunctionDeclaration {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Value {
        self.parameters.schema()
    }
}

// -- Request/response types --------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest<'a> {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolsPayload<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolsPayload<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    response: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl GeminiBackend {
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
        &self,
        turns: &[ConversationTurn],
        declarations: &'a [FunctionDeclaration],
    ) -> GenerateRequest<'a> {
        let tools = if declarations.is_empty() {
            Vec::new()
        } else {
            vec![ToolsPayload {
                function_declarations: declarations,
            }]
        };

        GenerateRequest {
            contents: render_contents(turns),
            tools,
            generation_config: GenerationConfig {
                max_output_tokens: self.max_tokens,
            },
        }
    }
}

/// Render the turn history as Gemini contents.
///
/// Assistant turns use the `model` role; user text and tool results use
/// `user`. Consecutive turns with the same role share one content entry.
pub(crate) fn render_contents(turns: &[ConversationTurn]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();

    for turn in turns {
        let role = match turn.role {
            TurnRole::Assistant => "model",
            TurnRole::User | TurnRole::Tool => "user",
        };

        let part = match &turn.content {
            TurnContent::Text { text } => Part {
                text: Some(text.clone()),
                ..Part::default()
            },
            TurnContent::ToolCall { call } => Part {
                function_call: Some(FunctionCall {
                    id: call.backend_id().map(String::from),
                    name: call.name.clone(),
                    args: call.arguments.clone(),
                }),
                thought_signature: call.signature.clone(),
                ..Part::default()
            },
            TurnContent::ToolResult { result } => {
                let response = if result.is_error {
                    json!({ "error": result.content_text() })
                } else {
                    json!({ "name": result.call.name, "content": result.content })
                };
                Part {
                    function_response: Some(FunctionResponse {
                        id: result.call.backend_id().map(String::from),
                        name: result.call.name.clone(),
                        response,
                    }),
                    ..Part::default()
                }
            }
        };

        match contents.last_mut() {
            Some(last) if last.role == role => last.parts.push(part),
            _ => contents.push(Content {
                role: role.to_string(),
                parts: vec![part],
            }),
        }
    }

    contents
}

/// Union types and non-string enums have no Gemini equivalent.
fn inexpressible_shape(schema: &Map<String, Value>) -> Option<String> {
    if let Some(Value::Array(_)) = schema.get("type") {
        return Some("union `type`".into());
    }
    match schema.get("enum") {
        Some(Value::Array(members)) if members.iter().any(|m| !m.is_string()) => {
            Some("non-string `enum` member".into())
        }
        _ => None,
    }
}

/// Classify the first candidate's parts, in order.
pub(crate) fn parse_response(body: GenerateResponse) -> BridgeResult<Vec<Segment>> {
    let Some(candidate) = body.candidates.into_iter().next() else {
        let reason = body
            .prompt_feedback
            .and_then(|f| f.get("blockReason").and_then(Value::as_str).map(String::from))
            .unwrap_or_else(|| "no candidates".into());
        return Err(BridgeError::ModelBackend(format!("response contained no candidates: {reason}")));
    };

    let parts = match candidate.content {
        Some(content) if !content.parts.is_empty() => content.parts,
        _ => {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(BridgeError::ModelBackend(format!(
                "candidate has no content (finish reason: {reason})"
            )));
        }
    };
    let mut segments = Vec::with_capacity(parts.len());

    for part in parts {
        if let Some(call) = part.function_call {
            let mut request = match call.id {
                Some(id) => ToolCallRequest::with_id(id, call.name, call.args),
                None => ToolCallRequest::new(call.name, call.args),
            };
            request.signature = part.thought_signature;
            segments.push(Segment::ToolCall(request));
        } else if let Some(text) = part.text {
            if !text.trim().is_empty() {
                segments.push(Segment::Text(text));
            }
        }
    }

    Ok(segments)
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    type Declaration = FunctionDeclaration;

    fn name(&self) -> &'static str {
        BACKEND
    }

    fn declare(&self, descriptor: &ToolDescriptor) -> BridgeResult<FunctionDeclaration> {
        require_object_root(descriptor, BACKEND)?;
        let schema = &descriptor.input_schema;
        let unsupported = |reason: String| BridgeError::UnsupportedSchema {
            tool: descriptor.name.clone(),
            backend: BACKEND,
            reason,
        };

        if let Some((keyword, pointer)) = find_keyword(schema, UNSUPPORTED_KEYWORDS) {
            return Err(unsupported(format!("keyword `{keyword}` at {pointer}")));
        }
        if let Some((shape, pointer)) = find_in_schema(schema, &mut inexpressible_shape) {
            return Err(unsupported(format!("{shape} at {pointer}")));
        }

        let parameters = if find_keyword(schema, JSON_SCHEMA_KEYWORDS).is_some() {
            Parameters::JsonSchema(schema.clone())
        } else {
            Parameters::OpenApi(schema.clone())
        };

        Ok(FunctionDeclaration {
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            parameters,
        })
    }

    async fn generate(
        &self,
        turns: &[ConversationTurn],
        declarations: &[FunctionDeclaration],
    ) -> BridgeResult<Vec<Segment>> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let request = self.build_request(turns, declarations);

        debug!(
            "Inference request to model {} ({} contents, {} tools)",
            self.model,
            request.contents.len(),
            declarations.len()
        );

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
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

        let body: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::ModelBackend(format!("failed to parse inference response: {e}")))?;

        parse_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> GeminiBackend {
        GeminiBackend::new("http://localhost", "k", "gemini-2.0-flash", 512)
    }

    fn descriptor(schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: "t".into(),
            description: String::new(),
            input_schema: schema,
        }
    }

    #[test]
    fn declare_rejects_keywords_gemini_cannot_express() {
        let err = backend()
            .declare(&descriptor(json!({
                "type": "object",
                "properties": { "mode": { "allOf": [{ "type": "string" }, { "minLength": 1 }] } }
            })))
            .unwrap_err();
        match err {
            BridgeError::UnsupportedSchema { backend, reason, .. } => {
                assert_eq!(backend, "gemini");
                assert!(reason.contains("allOf"));
                assert!(reason.contains("/properties/mode"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(backend()
            .declare(&descriptor(json!({ "type": "object", "const": {} })))
            .is_err());
    }

    #[test]
    fn declare_rejects_union_types() {
        let err = backend()
            .declare(&descriptor(json!({
                "type": "object",
                "properties": { "note": { "type": ["string", "null"] } }
            })))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnsupportedSchema { ref reason, .. }
                if reason == "union `type` at /properties/note"
        ));
    }

    #[test]
    fn declare_rejects_non_string_enum_members() {
        let err = backend()
            .declare(&descriptor(json!({
                "type": "object",
                "properties": {
                    "level": { "type": "array", "items": { "type": "integer", "enum": [1, 2, 3] } }
                }
            })))
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnsupportedSchema { ref reason, .. }
                if reason == "non-string `enum` member at /properties/level/items"
        ));
    }

    #[test]
    fn sdk_generated_schema_goes_through_json_schema_field() {
        // Shape emitted by the TypeScript MCP SDK for every tool.
        let schema = json!({
            "type": "object",
            "properties": { "a": { "type": "number" } },
            "required": ["a"],
            "additionalProperties": false,
            "$schema": "http://json-schema.org/draft-07/schema#"
        });
        let decl = backend().declare(&descriptor(schema.clone())).unwrap();
        assert_eq!(decl.parameters, Parameters::JsonSchema(schema.clone()));
        assert_eq!(decl.schema(), &schema);

        let wire = serde_json::to_value(&decl).unwrap();
        assert_eq!(wire["parametersJsonSchema"], schema);
        assert!(wire.get("parameters").is_none());
    }

    #[test]
    fn declare_accepts_enums_and_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "unit": { "type": "string", "enum": ["c", "f"] },
                "where": {
                    "type": "object",
                    "properties": { "city": { "type": "string" } }
                },
                "maybe": { "anyOf": [{ "type": "string" }, { "type": "null" }] }
            }
        });
        let decl = backend().declare(&descriptor(schema.clone())).unwrap();
        assert_eq!(decl.parameters, Parameters::OpenApi(schema.clone()));

        let wire = serde_json::to_value(&decl).unwrap();
        assert_eq!(wire["parameters"], schema);
        assert!(wire.get("parametersJsonSchema").is_none());
    }

    #[test]
    fn request_uses_function_declarations_and_model_role() {
        let mut args = Map::new();
        args.insert("location".into(), json!("Paris"));
        let call = ToolCallRequest::new("get_weather", args);
        let turns = vec![
            ConversationTurn::user("weather in Paris"),
            ConversationTurn::tool_call(call.clone()),
            ConversationTurn::tool_result(ToolCallResult::success(call, json!("Sunny, 20C"))),
        ];
        let decls = vec![FunctionDeclaration {
            name: "get_weather".into(),
            description: "weather".into(),
            parameters: Parameters::OpenApi(json!({ "type": "object" })),
        }];

        let body = serde_json::to_value(backend().build_request(&turns, &decls)).unwrap();
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "get_weather");

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[0]["parts"][0]["text"], "weather in Paris");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["location"], "Paris");
        assert_eq!(contents[2]["role"], "user");
        assert_eq!(
            contents[2]["parts"][0]["functionResponse"]["response"]["content"],
            "Sunny, 20C"
        );
    }

    #[test]
    fn consecutive_same_role_turns_share_a_content() {
        let call = ToolCallRequest::new("noop", Map::new());
        let turns = vec![
            ConversationTurn::user("go"),
            ConversationTurn::assistant("Working on it."),
            ConversationTurn::tool_call(call.clone()),
            ConversationTurn::tool_result(ToolCallResult::failure(call, "boom")),
        ];
        let contents = render_contents(&turns);
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1].parts.len(), 2);
        assert_eq!(
            contents[2].parts[0].function_response.as_ref().unwrap().response,
            json!({ "error": "boom" })
        );
    }

    #[test]
    fn response_parts_keep_order() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "Let me look." },
                        { "functionCall": { "name": "get_weather", "args": { "location": "Paris" } } },
                        { "functionCall": { "id": "fc-2", "name": "noop" } }
                    ]
                }
            }]
        }))
        .unwrap();

        let segments = parse_response(body).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Text("Let me look.".into()));
        match &segments[1] {
            Segment::ToolCall(c) => {
                assert_eq!(c.name, "get_weather");
                assert_eq!(c.arguments["location"], "Paris");
                assert!(!c.id.is_empty());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(matches!(&segments[2], Segment::ToolCall(c) if c.id == "fc-2"));
    }

    #[test]
    fn blocked_prompt_is_a_backend_error() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap();
        match parse_response(body) {
            Err(BridgeError::ModelBackend(msg)) => assert!(msg.contains("SAFETY")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn backend_call_ids_and_signatures_are_echoed() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": { "id": "fc-1", "name": "get_weather", "args": {} },
                        "thoughtSignature": "sig-abc"
                    }]
                }
            }]
        }))
        .unwrap();
        let Segment::ToolCall(call) = parse_response(body).unwrap().remove(0) else {
            panic!("expected a tool call");
        };
        let local = ToolCallRequest::new("noop", Map::new());

        let turns = vec![
            ConversationTurn::tool_call(call.clone()),
            ConversationTurn::tool_result(ToolCallResult::success(call, json!("Sunny"))),
            ConversationTurn::tool_call(local.clone()),
            ConversationTurn::tool_result(ToolCallResult::success(local, json!("ok"))),
        ];
        let contents = serde_json::to_value(render_contents(&turns)).unwrap();

        let model = &contents[0]["parts"];
        assert_eq!(model[0]["functionCall"]["id"], "fc-1");
        assert_eq!(model[0]["thoughtSignature"], "sig-abc");
        let user = &contents[1]["parts"];
        assert_eq!(user[0]["functionResponse"]["id"], "fc-1");

        // Locally generated ids never reach the backend.
        let model = &contents[2]["parts"];
        assert!(model[0]["functionCall"].get("id").is_none());
        assert!(model[0].get("thoughtSignature").is_none());
        assert!(contents[3]["parts"][0]["functionResponse"].get("id").is_none());
    }

    #[test]
    fn empty_candidate_reports_finish_reason() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "finishReason": "SAFETY" }]
        }))
        .unwrap();
        match parse_response(body) {
            Err(BridgeError::ModelBackend(msg)) => assert!(msg.contains("SAFETY")),
            other => panic!("unexpected result: {other:?}"),
        }

        let body: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "role": "model", "parts": [] }, "finishReason": "MAX_TOKENS" }]
        }))
        .unwrap();
        assert!(matches!(
            parse_response(body),
            Err(BridgeError::ModelBackend(ref msg)) if msg.contains("MAX_TOKENS")
        ));
    }
}
