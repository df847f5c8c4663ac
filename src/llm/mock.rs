//! Scripted model backend for tests and demos.
//!
//! Each `generate` call consumes the next scripted step; once the script is
//! exhausted the last step repeats, which models a backend that never stops
//! asking for tools.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Mutex;

use super::{ModelBackend, ToolDeclaration};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{ConversationTurn, Segment, ToolCallRequest, ToolDescriptor};

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(Vec<Segment>),
    Fail(String),
}

/// Declaration used by the scripted backend: the descriptor as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedDeclaration {
    pub name: String,
    pub schema: Value,
}

impl ToolDeclaration for ScriptedDeclaration {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Value {
        &self.schema
    }
}

/// What the backend was sent on one round.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub turns: Vec<ConversationTurn>,
    pub declared: Vec<String>,
}

pub struct ScriptedBackend {
    steps: Vec<ScriptStep>,
    requests: Mutex<Vec<RecordedRequest>>,
    rejected_tools: Vec<String>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            requests: Mutex::new(Vec::new()),
            rejected_tools: Vec::new(),
        }
    }

    /// Shorthand for a script of plain responses.
    pub fn responses(responses: Vec<Vec<Segment>>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::Respond).collect())
    }

    /// Treat these tools as having unsupported schemas.
    pub fn rejecting(mut self, tools: &[&str]) -> Self {
        self.rejected_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Requests received so far, one per round.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn rounds(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Text segment.
pub fn text(s: &str) -> Segment {
    Segment::Text(s.to_string())
}

/// Tool-call segment with arguments given as a JSON object.
pub fn call(name: &str, arguments: Value) -> Segment {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Segment::ToolCall(ToolCallRequest::new(name, arguments))
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    type Declaration = ScriptedDeclaration;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn declare(&self, descriptor: &ToolDescriptor) -> BridgeResult<ScriptedDeclaration> {
        if self.rejected_tools.contains(&descriptor.name) {
            return Err(BridgeError::UnsupportedSchema {
                tool: descriptor.name.clone(),
                backend: "scripted",
                reason: "rejected by script".into(),
            });
        }
        Ok(ScriptedDeclaration {
            name: descriptor.name.clone(),
            schema: descriptor.input_schema.clone(),
        })
    }

    async fn generate(
        &self,
        turns: &[ConversationTurn],
        declarations: &[ScriptedDeclaration],
    ) -> BridgeResult<Vec<Segment>> {
        let round = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(RecordedRequest {
                turns: turns.to_vec(),
                declared: declarations.iter().map(|d| d.name.clone()).collect(),
            });
            requests.len() - 1
        };

        let step = self
            .steps
            .get(round)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(ScriptStep::Respond(Vec::new()));

        match step {
            ScriptStep::Respond(segments) => Ok(segments
                .into_iter()
                .map(|s| match s {
                    // Fresh ids keep repeated steps distinguishable.
                    Segment::ToolCall(c) => Segment::ToolCall(ToolCallRequest::new(c.name, c.arguments)),
                    other => other,
                })
                .collect()),
            ScriptStep::Fail(message) => Err(BridgeError::ModelBackend(message)),
        }
    }
}
