//! mcpgwd - MCP Gateway Daemon
//!
//! Accepts JSON-RPC envelopes over HTTP and dispatches them to the
//! configured MCP backends.
//!
//! Usage:
//!   mcpgwd [OPTIONS]
//!
//! Sending SIGHUP re-reads the config file. A file that fails to load or
//! validate leaves the running configuration untouched.

mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mcpgw_core::GatewayConfig;
use mcpgw_gateway::Gateway;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when RUST_LOG is not set
const DEFAULT_LOG_FILTER: &str = "mcpgwd=info,mcpgw_gateway=info,mcpgw_client=info";

#[derive(Parser)]
#[command(name = "mcpgwd")]
#[command(author, version, about = "MCP protocol gateway daemon")]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MCPGW_CONFIG", default_value = "mcpgw.toml")]
    config: PathBuf,

    /// Listen address, overrides `[server] bind`
    #[arg(short, long, env = "MCPGW_BIND")]
    bind: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    tracing::info!("Starting mcpgwd (MCP Gateway Daemon)");

    tracing::info!("Loading config from: {}", args.config.display());
    let config = load_config(&args.config)?;
    let bind = args.bind.clone().unwrap_or_else(|| config.server.bind.clone());

    for backend in &config.backends {
        tracing::info!(
            backend = %backend.name,
            url = %backend.url,
            timeout_ms = backend.timeout_ms,
            max_retries = backend.max_retries,
            "Configured backend"
        );
    }

    let gateway = Arc::new(Gateway::from_config(&config).context("failed to build HTTP client")?);

    #[cfg(unix)]
    spawn_reload_on_sighup(gateway.clone(), args.config.clone())?;

    let app = server::create_router(gateway);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("mcpgwd stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    GatewayConfig::load(path).with_context(|| format!("invalid config {}", path.display()))
}

#[cfg(unix)]
fn spawn_reload_on_sighup(gateway: Arc<Gateway>, path: PathBuf) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading {}", path.display());
            let reloaded = load_config(&path)
                .and_then(|config| gateway.reload(&config).map_err(anyhow::Error::from));
            match reloaded {
                Ok(generation) => tracing::info!(generation, "Reload complete"),
                Err(e) => tracing::error!("Reload failed, keeping current config: {:#}", e),
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
