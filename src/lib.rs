//! toolbridge: chat with a language model that can call the tools of an
//! MCP server.
//!
//! The bridge launches a tool server over stdio, translates its tools into
//! OpenAI or Gemini function declarations, and runs a loop that dispatches
//! the model's tool calls until it answers in plain text.

pub mod agent;
pub mod config;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod tools;
pub mod types;
