//! Interactive chat session around a conversation engine.

use anyhow::{Context, Result};
use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::engine::ConversationEngine;
use crate::error::BridgeError;
use crate::llm::ModelBackend;
use crate::mcp::ToolServer;
use crate::tools::ToolCatalog;

/// Line-oriented chat loop: one query at a time until `quit`, `exit` or
/// end of input.
pub struct ChatSession<B: ModelBackend> {
    engine: ConversationEngine<B>,
}

/// Whether the line asks to leave the session.
pub fn is_exit_command(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "quit" | "exit")
}

impl<B: ModelBackend> ChatSession<B> {
    pub fn new(engine: ConversationEngine<B>) -> Self {
        Self { engine }
    }

    /// Read queries from `input` and print answers to `output`.
    ///
    /// Ctrl+C at the prompt ends the session; during a query it cancels the
    /// query at the next round boundary.
    pub async fn run<R, W>(&mut self, input: R, output: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        writeln!(output, "\n{}", "toolbridge started!".green().bold())?;
        writeln!(output, "Type your queries or 'quit' to exit.")?;

        let mut lines = input.lines();

        loop {
            write!(output, "\nQuery: ")?;
            output.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read query")?,
                _ = tokio::signal::ctrl_c() => {
                    writeln!(output)?;
                    None
                }
            };
            let Some(line) = line else {
                info!("Input closed; ending session");
                break;
            };

            let query = line.trim();
            if query.is_empty() {
                continue;
            }
            if is_exit_command(query) {
                break;
            }

            self.answer(query, output).await?;
        }

        Ok(())
    }

    /// Run one query and print its outcome. Only write failures escape.
    async fn answer<W: Write>(&mut self, query: &str, output: &mut W) -> Result<()> {
        let cancel = CancellationToken::new();
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let result = self.engine.process_query(query, &cancel).await;
        watcher.abort();

        match result {
            Ok(outcome) => {
                info!(
                    "Query answered in {} round(s) with {} tool call(s)",
                    outcome.rounds, outcome.tool_calls
                );
                writeln!(output, "\n{}", outcome)?;
            }
            Err(e @ (BridgeError::RoundLimitExceeded { .. } | BridgeError::Cancelled { .. })) => {
                if let Some(partial) = e.partial_output().filter(|p| !p.is_empty()) {
                    writeln!(output, "\n{}", partial)?;
                }
                writeln!(output, "{}", format!("Warning: {e}").yellow())?;
            }
            Err(e) => {
                warn!("Query failed: {}", e);
                writeln!(output, "\n{}", format!("Error: {e}").red())?;
            }
        }
        Ok(())
    }
}

/// Initialize the server, run the session, and close the server on every
/// exit path.
pub async fn serve<B, R, W>(
    server: Arc<dyn ToolServer>,
    backend: B,
    max_rounds: usize,
    input: R,
    output: &mut W,
) -> Result<()>
where
    B: ModelBackend,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let result = async {
        let info = server
            .initialize()
            .await
            .context("Failed to initialize tool server")?;
        let mut catalog = ToolCatalog::new(server.clone());
        catalog.refresh().await.context("Failed to list tools")?;
        info!("Tool server {} {} ready", info.name, info.version);
        writeln!(output, "\nConnected to server with tools: {:?}", catalog.names())?;

        let engine = ConversationEngine::new(backend, server.clone(), max_rounds);
        ChatSession::new(engine).run(input, output).await
    }
    .await;

    if let Err(e) = server.close().await {
        warn!("Failed to close tool server: {}", e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{call, text};
    use crate::llm::{ScriptStep, ScriptedBackend};
    use crate::tools::MockToolServer;
    use serde_json::json;

    async fn run_session(
        server: Arc<MockToolServer>,
        backend: ScriptedBackend,
        input: &'static [u8],
    ) -> (Result<()>, String) {
        let mut output = Vec::new();
        let result = serve(server, backend, 5, input, &mut output).await;
        (result, String::from_utf8_lossy(&output).into_owned())
    }

    #[test]
    fn exit_commands_are_case_insensitive() {
        assert!(is_exit_command("quit"));
        assert!(is_exit_command("  EXIT "));
        assert!(is_exit_command("Quit"));
        assert!(!is_exit_command("quit now"));
        assert!(!is_exit_command(""));
    }

    #[tokio::test]
    async fn weather_query_prints_annotation_and_answer() {
        let server = Arc::new(MockToolServer::weather());
        let backend = ScriptedBackend::responses(vec![
            vec![call("get_weather", json!({ "location": "Paris" }))],
            vec![text("It is sunny in Paris.")],
        ]);

        let (result, out) = run_session(server.clone(), backend, b"weather in Paris\n\nquit\n").await;
        result.unwrap();

        assert!(out.contains(r#"Connected to server with tools: ["get_weather"]"#));
        assert!(out.contains(
            r#"[Calling tool get_weather with args {"location":"Paris"} -> Sunny, 20C]"#
        ));
        assert!(out.contains("It is sunny in Paris."));
        // Prompted for the query, the skipped blank line and quit.
        assert_eq!(out.matches("Query: ").count(), 3);
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn backend_error_is_reported_and_session_continues() {
        let server = Arc::new(MockToolServer::weather());
        let backend = ScriptedBackend::new(vec![
            ScriptStep::Fail("quota exhausted".into()),
            ScriptStep::Respond(vec![text("Back online.")]),
        ]);

        let (result, out) = run_session(server.clone(), backend, b"first\nsecond\nexit\n").await;
        result.unwrap();

        assert!(out.contains("Error: model backend error: quota exhausted"));
        assert!(out.contains("Back online."));
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn round_limit_prints_partial_output_with_warning() {
        let server = Arc::new(MockToolServer::weather());
        let backend = ScriptedBackend::responses(vec![vec![call(
            "get_weather",
            json!({ "location": "Paris" }),
        )]]);

        let (result, out) = run_session(server, backend, b"loop\n").await;
        result.unwrap();

        assert!(out.contains("-> Sunny, 20C]"));
        assert!(out.contains("Warning: round limit of 5 exceeded"));
    }

    #[tokio::test]
    async fn end_of_input_ends_session_and_closes_server() {
        let server = Arc::new(MockToolServer::weather());
        let backend = ScriptedBackend::responses(vec![vec![text("unused")]]);

        let (result, _) = run_session(server.clone(), backend, b"").await;
        result.unwrap();
        assert!(server.is_closed());
    }

    #[tokio::test]
    async fn server_is_closed_when_startup_fails() {
        let server = Arc::new(MockToolServer::weather());
        server.close().await.unwrap();
        let backend = ScriptedBackend::responses(vec![vec![text("unused")]]);

        let (result, out) = run_session(server.clone(), backend, b"hi\n").await;
        assert!(result.is_err());
        assert!(!out.contains("Query: "));
        assert!(server.is_closed());
    }
}
