//! LoveGuru Node - real-time chat server.
//!
//! This is the main entry point for running the chat hub over HTTP.

use anyhow::Context;
use clap::Parser;
use loveguru_node::api::{create_router, AppState};
use loveguru_node::config::NodeConfig;
use loveguru_node::observability::{init_logging, LogFormat};
use loveguru_realtime::{HubManager, InMemoryStore};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// LoveGuru Node - real-time chat transport
#[derive(Parser, Debug)]
#[command(name = "loveguru-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API listen address
    #[arg(long)]
    api_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Number of hub shards
    #[arg(long)]
    shards: Option<usize>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(&self, config: &mut NodeConfig) {
        if let Some(addr) = self.api_addr {
            config.api_addr = addr;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = LogFormat::parse(format);
        }
        if let Some(shards) = self.shards {
            config.hub.shard_count = shards;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config =
        NodeConfig::load(args.config.as_deref()).context("loading node configuration")?;
    args.apply(&mut config);
    config.hub.validate().context("validating hub configuration")?;

    init_logging(&config.log_level, config.log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting LoveGuru node");
    info!(
        api_addr = %config.api_addr,
        shards = config.hub.shard_count,
        max_connections = config.hub.max_connections,
        "Node configuration"
    );

    let origins = config.hub.origin_policy();
    let hubs = Arc::new(
        HubManager::start(config.hub.clone(), Arc::new(InMemoryStore::new()), None)
            .context("starting hub manager")?,
    );

    let app = create_router(AppState::new(hubs.clone(), origins));

    let listener = tokio::net::TcpListener::bind(config.api_addr)
        .await
        .with_context(|| format!("binding {}", config.api_addr))?;
    info!(addr = %config.api_addr, "Node is ready. Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hubs))
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM after closing every chat connection.
async fn shutdown_signal(hubs: Arc<HubManager>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, closing chat connections");
    hubs.shutdown().await;
}
