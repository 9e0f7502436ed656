//! Kadabra Sigils MCP Server - Entry Point
//!
//! Sets up logging, parses arguments, activates the workspace project, and
//! serves the tool surface over stdio.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rmcp::{ServiceExt, transport::stdio};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use kadabra_sigils::agent::Agent;
use kadabra_sigils::config::ServerRegistry;
use kadabra_sigils::mcp::KadabraSigils;

/// MCP server for symbol-level code navigation and editing via language servers.
#[derive(Parser, Debug)]
#[command(name = "kadabra-sigils")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root directory to activate.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Language server overrides, repeatable: LANG=CMD[,ARG...]
    /// (e.g. --language-server python=pyright-langserver,--stdio).
    #[arg(long = "language-server")]
    language_servers: Vec<String>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Parses the log level string into a tracing Level.
    fn parse_log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            other => anyhow::bail!("invalid log level: {}", other),
        }
    }

    /// Builds the server registry with CLI overrides applied.
    fn build_registry(&self) -> Result<ServerRegistry> {
        let mut registry = ServerRegistry::default();
        for spec in &self.language_servers {
            registry
                .apply_override(spec)
                .with_context(|| format!("bad --language-server value '{spec}'"))?;
        }
        Ok(registry)
    }
}

/// Initializes the tracing subscriber for logging.
fn init_tracing(level: Level) -> Result<()> {
    // Create an env filter that respects RUST_LOG but has a default level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kadabra_sigils={level}")));

    // Note: logs go to stderr to keep stdout clean for MCP communication
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true),
        )
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.parse_log_level()?;
    init_tracing(log_level)?;

    let workspace = args.workspace.canonicalize().context(format!(
        "failed to canonicalize workspace path: {}",
        args.workspace.display()
    ))?;

    info!(
        workspace = %workspace.display(),
        "starting kadabra-sigils MCP server"
    );

    let registry = args.build_registry()?;
    let agent = Arc::new(Agent::new(registry));
    agent
        .activate_project(&workspace)
        .await
        .context("failed to activate workspace project")?;

    let server = KadabraSigils::new(&agent);

    info!("starting MCP server with stdio transport");
    let service = server
        .serve(stdio())
        .await
        .context("failed to start MCP server")?;

    info!("MCP server started, waiting for messages");
    service.waiting().await?;

    info!("MCP server shut down gracefully");
    Ok(())
}
