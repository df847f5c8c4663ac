//! Tool-server channel: the four operations the conversation core needs,
//! plus an MCP client speaking JSON-RPC over a child process' stdio.

pub mod protocol;
pub mod stdio;

pub use stdio::StdioToolServer;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::BridgeResult;
use crate::types::ToolDescriptor;

/// Identity the server reports from `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Raw `tools/call` result as sent by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CallToolOutput {
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(rename = "structuredContent", default)]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Channel to a process exposing callable tools.
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Perform the protocol handshake.
    async fn initialize(&self) -> BridgeResult<ServerInfo>;

    /// List the tools the server currently exposes.
    async fn list_tools(&self) -> BridgeResult<Vec<ToolDescriptor>>;

    /// Call a tool with arguments forwarded verbatim.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> BridgeResult<CallToolOutput>;

    /// Release the channel. Calling it twice is harmless.
    async fn close(&self) -> BridgeResult<()>;
}
