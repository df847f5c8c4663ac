//! In-process tool server for tests and demos.
//!
//! Serves a fixed tool list and canned replies, and records every call so
//! tests can assert what reached the server.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::mcp::{CallToolOutput, ServerInfo, ToolServer};
use crate::types::ToolDescriptor;

/// Canned reply for one tool.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful result with a single text block.
    Text(String),
    /// Result flagged `isError: true` with a text block.
    ToolError(String),
    /// JSON-RPC level failure of the call.
    RpcError(String),
}

/// Tool server double with canned replies.
pub struct MockToolServer {
    tools: Mutex<Vec<ToolDescriptor>>,
    replies: Mutex<HashMap<String, MockReply>>,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    list_count: AtomicUsize,
    closed: AtomicBool,
}

impl MockToolServer {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools: Mutex::new(tools),
            replies: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            list_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// `get_weather(location: string)` answering "Sunny, 20C".
    pub fn weather() -> Self {
        let server = Self::new(vec![Self::weather_descriptor()]);
        server.reply("get_weather", MockReply::Text("Sunny, 20C".into()));
        server
    }

    pub fn weather_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "get_weather".into(),
            description: "Get the current weather for a location".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "location": { "type": "string" } },
                "required": ["location"]
            }),
        }
    }

    pub fn set_tools(&self, tools: Vec<ToolDescriptor>) {
        *self.tools.lock().unwrap_or_else(|e| e.into_inner()) = tools;
    }

    pub fn reply(&self, tool: &str, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(tool.to_string(), reply);
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<(String, Map<String, Value>)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn list_count(&self) -> usize {
        self.list_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::ServerUnavailable("mock tool server is closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolServer for MockToolServer {
    async fn initialize(&self) -> BridgeResult<ServerInfo> {
        self.ensure_open()?;
        Ok(ServerInfo {
            name: "mock".into(),
            version: "0.0.0".into(),
        })
    }

    async fn list_tools(&self) -> BridgeResult<Vec<ToolDescriptor>> {
        self.ensure_open()?;
        self.list_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.tools.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> BridgeResult<CallToolOutput> {
        self.ensure_open()?;
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((name.to_string(), arguments));

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_else(|| MockReply::Text(String::new()));

        match reply {
            MockReply::Text(text) => Ok(CallToolOutput {
                content: vec![json!({ "type": "text", "text": text })],
                ..CallToolOutput::default()
            }),
            MockReply::ToolError(text) => Ok(CallToolOutput {
                content: vec![json!({ "type": "text", "text": text })],
                is_error: true,
                ..CallToolOutput::default()
            }),
            MockReply::RpcError(message) => Err(BridgeError::ToolExecution {
                tool: name.to_string(),
                payload: json!({ "code": -32603, "message": message }),
            }),
        }
    }

    async fn close(&self) -> BridgeResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
