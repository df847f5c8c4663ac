//! MCP client over a spawned tool-server process.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{ChannelError, JsonRpcChannel};
use super::{CallToolOutput, ServerInfo, ToolServer};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::types::ToolDescriptor;

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Grace period for the server to exit after its stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type StdioChannel = JsonRpcChannel<BufReader<ChildStdout>, ChildStdin>;

/// Tool server reached through a child process' stdin/stdout.
pub struct StdioToolServer {
    channel: Mutex<Option<StdioChannel>>,
    child: Mutex<Option<Child>>,
    timeout: Duration,
}

/// Pick the interpreter for a server script from its extension.
pub fn launch_command<'a>(target: &Path, config: &'a BridgeConfig) -> BridgeResult<&'a str> {
    match target.extension().and_then(|e| e.to_str()) {
        Some("py") => Ok(config.python_command.as_str()),
        Some("js") => Ok(config.node_command.as_str()),
        _ => Err(BridgeError::Config(format!(
            "server script must be a .py or .js file: {}",
            target.display()
        ))),
    }
}

impl StdioToolServer {
    /// Spawn the server script. Its stderr is inherited so server logs stay
    /// visible; the process is killed if this value is dropped unclosed.
    pub fn launch(target: &Path, config: &BridgeConfig) -> BridgeResult<Self> {
        let command = launch_command(target, config)?;

        let mut child = Command::new(command)
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::ServerUnavailable(format!(
                    "failed to start '{} {}': {}",
                    command,
                    target.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::ServerUnavailable("tool server stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::ServerUnavailable("tool server stdout unavailable".into()))?;

        info!("Launched tool server: {} {}", command, target.display());

        Ok(Self {
            channel: Mutex::new(Some(JsonRpcChannel::new(BufReader::new(stdout), stdin))),
            child: Mutex::new(Some(child)),
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ChannelError> {
        let mut guard = self.channel.lock().await;
        let channel = guard
            .as_mut()
            .ok_or_else(|| ChannelError::Transport("tool server channel is closed".into()))?;

        let outcome = tokio::time::timeout(self.timeout, channel.request(method, params)).await;
        match outcome {
            Ok(result) => result,
            Err(_) => {
                // A late response would desynchronize ids; treat the channel as dead.
                *guard = None;
                Err(ChannelError::Transport(format!(
                    "timed out after {:?} waiting for {}",
                    self.timeout, method
                )))
            }
        }
    }
}

/// Parse one `tools/list` result page into descriptors and the next cursor.
pub fn parse_tool_page(result: Value) -> BridgeResult<(Vec<ToolDescriptor>, Option<String>)> {
    let next_cursor = result
        .get("nextCursor")
        .and_then(Value::as_str)
        .map(String::from);

    let tools = match result.get("tools") {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(BridgeError::ServerUnavailable(
                "malformed tools/list result: `tools` is not an array".into(),
            ))
        }
        None => {
            return Err(BridgeError::ServerUnavailable(
                "malformed tools/list result: missing `tools`".into(),
            ))
        }
    };

    let descriptors = tools
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<ToolDescriptor>(item).map_err(|e| {
                BridgeError::ServerUnavailable(format!("malformed tool #{i} in listing: {e}"))
            })
        })
        .collect::<BridgeResult<Vec<_>>>()?;

    Ok((descriptors, next_cursor))
}

fn transport_error(err: ChannelError) -> BridgeError {
    BridgeError::ServerUnavailable(err.to_string())
}

#[async_trait]
impl ToolServer for StdioToolServer {
    async fn initialize(&self) -> BridgeResult<ServerInfo> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let result = self.request("initialize", Some(params)).await.map_err(transport_error)?;
        let info: ServerInfo = result
            .get("serverInfo")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| BridgeError::ServerUnavailable(format!("malformed initialize result: {e}")))?
            .unwrap_or_default();

        {
            let mut guard = self.channel.lock().await;
            let channel = guard
                .as_mut()
                .ok_or_else(|| BridgeError::ServerUnavailable("tool server channel is closed".into()))?;
            channel
                .notify("notifications/initialized", None)
                .await
                .map_err(transport_error)?;
        }

        info!("Tool server initialized: {} {}", info.name, info.version);
        Ok(info)
    }

    async fn list_tools(&self) -> BridgeResult<Vec<ToolDescriptor>> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let result = self.request("tools/list", params).await.map_err(transport_error)?;
            let (page, next) = parse_tool_page(result)?;
            all.extend(page);

            match next {
                Some(c) if Some(&c) != cursor.as_ref() => cursor = Some(c),
                Some(_) => {
                    warn!("Tool server repeated its pagination cursor; stopping");
                    break;
                }
                None => break,
            }
        }

        debug!("Tool server lists {} tools", all.len());
        Ok(all)
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> BridgeResult<CallToolOutput> {
        let params = json!({ "name": name, "arguments": arguments });

        let result = match self.request("tools/call", Some(params)).await {
            Ok(result) => result,
            Err(ChannelError::Rpc(err)) => {
                return Err(BridgeError::ToolExecution {
                    tool: name.to_string(),
                    payload: serde_json::to_value(&err).unwrap_or_else(|_| json!(err.message)),
                })
            }
            Err(err) => return Err(transport_error(err)),
        };

        serde_json::from_value(result)
            .map_err(|e| BridgeError::ServerUnavailable(format!("malformed tools/call result: {e}")))
    }

    async fn close(&self) -> BridgeResult<()> {
        if let Some(channel) = self.channel.lock().await.take() {
            let mut stdin = channel.into_writer();
            if let Err(e) = stdin.shutdown().await {
                debug!("Closing tool server stdin failed: {}", e);
            }
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Tool server exited: {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeError::ServerUnavailable(format!(
                "failed waiting for tool server: {e}"
            ))),
            Err(_) => {
                warn!("Tool server did not exit after stdin closed; killing it");
                child
                    .kill()
                    .await
                    .map_err(|e| BridgeError::ServerUnavailable(format!("failed to kill tool server: {e}")))
            }
        }
    }
}
