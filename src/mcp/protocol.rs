//! JSON-RPC 2.0 framing over a line-delimited byte stream.
//!
//! MCP's stdio transport sends one JSON object per line. The channel here is
//! generic over the reader and writer so it can be driven by a child
//! process' pipes or by an in-memory duplex in tests.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

pub const JSONRPC_VERSION: &str = "2.0";

/// `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Transport(String),
    #[error("JSON-RPC error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

/// Any message the peer may send: a response, a request or a notification.
#[derive(Debug, Deserialize)]
struct Incoming {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Request/response channel with monotonically increasing integer ids.
pub struct JsonRpcChannel<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
}

impl<R, W> JsonRpcChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
        }
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Notifications and unrelated messages received in between are skipped;
    /// `ping` requests from the server are answered.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ChannelError> {
        let id = self.next_id;
        self.next_id += 1;

        self.send(&Request {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params,
        })
        .await?;
        debug!("-> {} (id {})", method, id);

        loop {
            let msg = self.read_message().await?;

            if let Some(server_method) = msg.method {
                match msg.id {
                    Some(req_id) => self.answer_server_request(&server_method, req_id).await?,
                    None => debug!("Skipping server notification: {}", server_method),
                }
                continue;
            }

            if msg.id.as_ref().and_then(Value::as_u64) != Some(id) {
                debug!("Skipping response for unexpected id {:?}", msg.id);
                continue;
            }

            if let Some(err) = msg.error {
                return Err(ChannelError::Rpc(err));
            }
            return Ok(msg.result.unwrap_or(Value::Null));
        }
    }

    /// Send a notification (no id, no response).
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ChannelError> {
        self.send(&Request {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params,
        })
        .await
    }

    /// Give back the underlying writer so the caller can close it.
    pub fn into_writer(self) -> W {
        self.writer
    }

    async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), ChannelError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| ChannelError::Transport(format!("failed to encode request: {e}")))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ChannelError::Transport(format!("write to tool server failed: {e}")))?;
        self.writer
            .flush()
            .await
            .map_err(|e| ChannelError::Transport(format!("flush to tool server failed: {e}")))
    }

    async fn read_message(&mut self) -> Result<Incoming, ChannelError> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| ChannelError::Transport(format!("read from tool server failed: {e}")))?;
            if n == 0 {
                return Err(ChannelError::Transport("tool server closed its output".into()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Incoming>(trimmed) {
                Ok(msg) => return Ok(msg),
                Err(e) => warn!("Ignoring non JSON-RPC line from tool server ({}): {}", e, trimmed),
            }
        }
    }

    async fn answer_server_request(&mut self, method: &str, id: Value) -> Result<(), ChannelError> {
        let reply = if method == "ping" {
            json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
        } else {
            debug!("Rejecting unsupported server request: {}", method);
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {method}") }
            })
        };
        self.send(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, BufReader};

    /// Channel wired to an in-memory peer; returns the peer's halves.
    fn pair() -> (
        JsonRpcChannel<BufReader<tokio::io::DuplexStream>, tokio::io::DuplexStream>,
        BufReader<tokio::io::DuplexStream>,
        tokio::io::DuplexStream,
    ) {
        let (client_out, server_in) = duplex(8192);
        let (server_out, client_in) = duplex(8192);
        (
            JsonRpcChannel::new(BufReader::new(client_in), client_out),
            BufReader::new(server_in),
            server_out,
        )
    }

    async fn read_json(reader: &mut BufReader<tokio::io::DuplexStream>) -> Value {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn request_matches_response_by_id() {
        let (mut channel, mut server_in, mut server_out) = pair();

        let server = tokio::spawn(async move {
            let req = read_json(&mut server_in).await;
            assert_eq!(req["jsonrpc"], "2.0");
            assert_eq!(req["method"], "tools/list");
            assert_eq!(req["id"], 1);
            // A notification and a stale response precede the real answer.
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n")
                .await
                .unwrap();
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":{}}\n")
                .await
                .unwrap();
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n")
                .await
                .unwrap();
        });

        let result = channel.request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({ "tools": [] }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_is_reported() {
        let (mut channel, mut server_in, mut server_out) = pair();

        let server = tokio::spawn(async move {
            let _ = read_json(&mut server_in).await;
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"error\":{\"code\":-32602,\"message\":\"bad args\"}}\n")
                .await
                .unwrap();
        });

        let err = channel.request("tools/call", Some(json!({}))).await.unwrap_err();
        match err {
            ChannelError::Rpc(e) => {
                assert_eq!(e.code, -32602);
                assert_eq!(e.message, "bad args");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn ping_from_server_is_answered() {
        let (mut channel, mut server_in, mut server_out) = pair();

        let server = tokio::spawn(async move {
            let _ = read_json(&mut server_in).await;
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":\"srv-1\",\"method\":\"ping\"}\n")
                .await
                .unwrap();
            let pong = read_json(&mut server_in).await;
            assert_eq!(pong["id"], "srv-1");
            assert_eq!(pong["result"], json!({}));
            server_out
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n")
                .await
                .unwrap();
        });

        let result = channel.request("initialize", Some(json!({}))).await.unwrap();
        assert_eq!(result["ok"], true);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_output_is_a_transport_error() {
        let (mut channel, server_in, server_out) = pair();
        drop(server_out);

        let err = channel.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        drop(server_in);
    }

    #[tokio::test]
    async fn notification_has_no_id() {
        let (mut channel, mut server_in, _server_out) = pair();
        channel.notify("notifications/initialized", None).await.unwrap();
        let msg = read_json(&mut server_in).await;
        assert_eq!(msg["method"], "notifications/initialized");
        assert!(msg.get("id").is_none());
    }
}
