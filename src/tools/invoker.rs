//! Dispatch of model-issued tool calls to the tool server.

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::mcp::{CallToolOutput, ToolServer};
use crate::types::{ToolCallRequest, ToolCallResult, ToolDescriptor};

/// Invokes tools declared to the model in the current round.
///
/// Only names in `available` are forwarded; anything else is refused before
/// the server is contacted.
pub struct ToolInvoker<'a> {
    server: &'a dyn ToolServer,
    available: &'a [ToolDescriptor],
}

impl<'a> ToolInvoker<'a> {
    pub fn new(server: &'a dyn ToolServer, available: &'a [ToolDescriptor]) -> Self {
        Self { server, available }
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.available.iter().any(|t| t.name == name)
    }

    /// Call the tool and normalize its output.
    ///
    /// Fails with `UnknownTool`, `ToolExecution` or `ServerUnavailable`; the
    /// caller is expected to feed those back to the model rather than abort.
    pub async fn invoke(&self, request: &ToolCallRequest) -> BridgeResult<ToolCallResult> {
        if !self.is_available(&request.name) {
            warn!("Model requested undeclared tool: {}", request.name);
            return Err(BridgeError::UnknownTool(request.name.clone()));
        }

        info!("Tool: {}({})", request.name, request.arguments_json());
        let output = self
            .server
            .call_tool(&request.name, request.arguments.clone())
            .await?;

        if output.is_error {
            return Err(BridgeError::ToolExecution {
                tool: request.name.clone(),
                payload: normalize_content(output),
            });
        }

        Ok(ToolCallResult::success(request.clone(), normalize_content(output)))
    }
}

/// Fold MCP content blocks into one value.
///
/// Text blocks are joined with newlines; without any text, structured
/// content wins, then the raw block list.
pub fn normalize_content(output: CallToolOutput) -> Value {
    let texts: Vec<&str> = output
        .content
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect();

    if !texts.is_empty() {
        return Value::String(texts.join("\n"));
    }
    if let Some(structured) = output.structured_content {
        return structured;
    }
    Value::Array(output.content)
}
