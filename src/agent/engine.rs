//! Tool-augmented conversation loop: Solicit → Classify & Dispatch → Decide.
//!
//! For one user query the engine repeatedly:
//! 1. Refreshes the tool catalog and translates it for the backend
//! 2. Asks the model for a response
//! 3. Records text and dispatches tool calls in the order emitted
//! 4. Loops while the model keeps asking for tools

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{payload_text, BridgeError, BridgeResult};
use crate::llm::{translate, ModelBackend};
use crate::mcp::ToolServer;
use crate::tools::{ToolCatalog, ToolInvoker};
use crate::types::*;

/// Runs queries against one model backend and one tool server.
pub struct ConversationEngine<B: ModelBackend> {
    backend: B,
    server: Arc<dyn ToolServer>,
    catalog: ToolCatalog,
    max_rounds: usize,
}

impl<B: ModelBackend> ConversationEngine<B> {
    pub fn new(backend: B, server: Arc<dyn ToolServer>, max_rounds: usize) -> Self {
        Self {
            backend,
            catalog: ToolCatalog::new(server.clone()),
            server,
            max_rounds: max_rounds.max(1),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Tools seen at the last catalog refresh.
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Answer one user query, calling tools as the model requests them.
    ///
    /// Tool failures are fed back to the model and never abort the query.
    /// Catalog and backend failures propagate. `cancel` is only checked
    /// between rounds.
    pub async fn process_query(
        &mut self,
        query: &str,
        cancel: &CancellationToken,
    ) -> BridgeResult<QueryOutcome> {
        let mut turns = vec![ConversationTurn::user(query)];
        let mut output: Vec<String> = Vec::new();
        let mut rounds = 0usize;
        let mut dispatched = 0usize;

        loop {
            if cancel.is_cancelled() {
                info!("Query cancelled after {} round(s)", rounds);
                return Err(BridgeError::Cancelled {
                    rounds,
                    partial: output.join("\n"),
                });
            }
            if rounds >= self.max_rounds {
                warn!("Round limit of {} reached; stopping query", self.max_rounds);
                return Err(BridgeError::RoundLimitExceeded {
                    limit: self.max_rounds,
                    partial: output.join("\n"),
                });
            }
            rounds += 1;

            // Solicit
            let descriptors = self.catalog.refresh().await?;
            let declared = translate(&self.backend, descriptors);
            info!(
                "[Round {}] Asking {} with {} tool(s) ({} omitted)",
                rounds,
                self.backend.name(),
                declared.declarations.len(),
                declared.rejected.len()
            );

            let segments = self.backend.generate(&turns, &declared.declarations).await?;
            debug!("[Round {}] {} segment(s)", rounds, segments.len());

            // Classify & dispatch
            let invoker = ToolInvoker::new(self.server.as_ref(), &declared.available);
            let mut calls_this_round = 0usize;

            for segment in segments {
                match segment {
                    Segment::Text(text) => {
                        info!("[Round {}] Model: {}", rounds, preview(&text));
                        output.push(text.clone());
                        turns.push(ConversationTurn::assistant(text));
                    }
                    Segment::ToolCall(call) => {
                        calls_this_round += 1;
                        turns.push(ConversationTurn::tool_call(call.clone()));

                        let invoked = invoker.invoke(&call).await;
                        let result = match invoked {
                            Ok(result) => {
                                info!("[Round {}] Tool {} returned", rounds, call.name);
                                result
                            }
                            Err(e) => {
                                warn!("[Round {}] Tool {} failed: {}", rounds, call.name, e);
                                ToolCallResult::failure(call, error_content(&e))
                            }
                        };

                        output.push(annotate(&result));
                        turns.push(ConversationTurn::tool_result(result));
                    }
                }
            }
            dispatched += calls_this_round;

            // Decide
            if calls_this_round == 0 {
                return Ok(QueryOutcome {
                    text: output.join("\n"),
                    rounds,
                    tool_calls: dispatched,
                });
            }
        }
    }
}

/// Human-readable line recording a tool call and its outcome.
pub fn annotate(result: &ToolCallResult) -> String {
    let outcome = if result.is_error {
        format!("error: {}", result.content_text())
    } else {
        result.content_text()
    };
    format!(
        "[Calling tool {} with args {} -> {}]",
        result.call.name,
        result.call.arguments_json(),
        outcome
    )
}

fn error_content(err: &BridgeError) -> String {
    match err {
        BridgeError::ToolExecution { payload, .. } => payload_text(payload),
        other => other.to_string(),
    }
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
