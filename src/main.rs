//! toolbridge: chat with an LLM that can call an MCP server's tools.
//!
//! Usage:
//!   toolbridge path/to/server.py
//!   toolbridge --backend openai --model gpt-4o-mini path/to/server.js

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

use toolbridge::agent;
use toolbridge::config::{self, BackendKind, BridgeConfig};
use toolbridge::llm::{GeminiBackend, OpenAiBackend};
use toolbridge::mcp::{StdioToolServer, ToolServer};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "toolbridge")]
#[command(version = "0.1.0")]
#[command(about = "Chat with a language model that can call MCP server tools")]
struct Cli {
    /// Tool server script to launch (.py or .js).
    server: PathBuf,

    /// Path to the config file.
    #[arg(long, default_value_os_t = config::default_config_path())]
    config: PathBuf,

    /// Model backend (openai or gemini).
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Model name for the selected backend.
    #[arg(long)]
    model: Option<String>,

    /// Maximum model rounds per query.
    #[arg(long)]
    max_rounds: Option<usize>,

    /// Log level (debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = config::resolve_path(&cli.config.to_string_lossy());
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    apply_overrides(&mut cfg, &cli);

    // Initialize logging. stdout belongs to the chat.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let api_key = config::api_key(cfg.backend)?;

    let server = StdioToolServer::launch(&cli.server, &cfg)
        .with_context(|| format!("Failed to launch tool server {}", cli.server.display()))?;
    let server: Arc<dyn ToolServer> = Arc::new(server);

    info!(
        "Using {} backend with model {}",
        cfg.backend,
        cfg.effective_model()
    );

    let input = BufReader::new(tokio::io::stdin());
    let mut output = std::io::stdout();

    match cfg.backend {
        BackendKind::OpenAi => {
            let backend = OpenAiBackend::new(
                &cfg.openai_api_url,
                &api_key,
                &cfg.openai_model,
                cfg.max_tokens,
            );
            agent::serve(server, backend, cfg.max_rounds, input, &mut output).await
        }
        BackendKind::Gemini => {
            let backend = GeminiBackend::new(
                &cfg.gemini_api_url,
                &api_key,
                &cfg.gemini_model,
                cfg.max_tokens,
            );
            agent::serve(server, backend, cfg.max_rounds, input, &mut output).await
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Command-line flags win over the config file.
fn apply_overrides(cfg: &mut BridgeConfig, cli: &Cli) {
    if let Some(backend) = cli.backend {
        cfg.backend = backend;
    }
    if let Some(model) = &cli.model {
        cfg.set_model(model.clone());
    }
    if let Some(max_rounds) = cli.max_rounds {
        cfg.max_rounds = max_rounds;
    }
    if let Some(level) = &cli.log_level {
        cfg.log_level = level.clone();
    }
}
