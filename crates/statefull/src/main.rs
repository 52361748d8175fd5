//! # Statefull - session affinity router
//!
//! Serves the node registry and browser allocation endpoints.
//!
//! ## Architecture
//! ```text
//! Browser → Statefull → Backend node
//!              ↓
//!        Node store (memory | Redis)
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use statefull::allocate::{RoundRobinPolicy, StickyPolicy};
use statefull::config::{AppConfig, ConfigOverrides, StoreBackend};
use statefull::registry::NodeTimeoutHook;
use statefull::state::{AppState, open_store};
use statefull::{Node, create_router};

/// Statefull - session affinity router
#[derive(Parser, Debug)]
#[command(name = "statefull")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/statefull.toml")]
    config: String,

    /// Redis URL (overrides config)
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// Node store backend (overrides config)
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

/// Logs evictions; the pool itself is already updated by the registry
struct LogTimeouts;

#[async_trait]
impl NodeTimeoutHook for LogTimeouts {
    async fn on_node_timeout(&self, node: &Node) {
        info!(node_id = node.id, url = %node.url, "Node left the pool after missing heartbeats");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up a local .env before clap reads env-backed args
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting Statefull v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let overrides = ConfigOverrides {
        redis_url: args.redis_url.clone(),
        listen_addr: args.listen.clone(),
        store: args.store,
    };
    let config = AppConfig::load(&args.config, &overrides)?;
    info!("Configuration loaded from {}", args.config);

    let store = open_store(&config).await?;
    info!(store = ?config.store, "Node store ready");

    let listen_addr = config.listen_addr.clone();
    let state = AppState::builder(
        config,
        store,
        Arc::new(StickyPolicy::new(RoundRobinPolicy::new())),
    )
    .node_timeout(Arc::new(LogTimeouts))
    .build()
    .context("Invalid configuration")?;

    let registry = state.registry.clone();

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Statefull listening on {}", listen_addr);

    // Handle graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
        registry.shutdown();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Statefull shutdown complete");
    Ok(())
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
