//! flintkv server - bounded-memory key-value store with durable persistence
//!
//! Main server process: loads configuration, recovers the store from its
//! snapshot and operation log, and serves the command protocol over TCP.

mod server;

use anyhow::{Context, Result};
use clap::Parser;
use flintkv_core::{
    CommandGateway, LatencyMonitor, SecurityPolicy, SlowLog, Store, StoreConfig,
};
use server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flintkv-server")]
#[command(about = "flintkv - bounded-memory key-value store")]
#[command(version)]
struct Args {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(short = 'D', long)]
    data_dir: Option<PathBuf>,

    /// TCP bind address
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// TCP port
    #[arg(short = 'p', long, default_value = "6480")]
    port: u16,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::new(format!(
        "flintkv_server={},flintkv_core={}",
        log_level, log_level
    ));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let mut config = match &args.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(data_dir) = args.data_dir {
        config.persistence.data_dir = data_dir;
    }

    info!("flintkv-server starting");
    info!("  data dir: {}", config.persistence.data_dir.display());
    info!("  memory ceiling: {} bytes", config.memory.ceiling_bytes);
    info!("  flush policy: {:?}", config.persistence.flush_policy);
    info!("  auth required: {}", config.security.require_auth);

    let policy = SecurityPolicy::from_settings(&config.security)
        .context("invalid security policy")?;
    let slowlog = SlowLog::new(
        Duration::from_millis(config.observability.slowlog_threshold_ms),
        config.observability.slowlog_capacity,
    );
    let latency = LatencyMonitor::new(Duration::from_micros(
        config.observability.latency_threshold_us,
    ));

    let store = Store::open(config).context("failed to open store")?;
    Arc::clone(&store).start_background_tasks();
    info!("store recovered and background workers started");

    let gateway = Arc::new(CommandGateway::new(
        Arc::clone(&store),
        policy,
        slowlog,
        latency,
    ));

    let bind_addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid bind address")?;

    let server = Server::new(Arc::clone(&gateway));
    let server_handle = tokio::spawn(async move { server.listen(bind_addr).await });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("server exited"),
                Ok(Err(e)) => info!("server error: {:?}", e),
                Err(e) => info!("server task error: {}", e),
            }
        }
    }

    store.shutdown().await.context("final log flush failed")?;
    info!("flintkv-server shutdown complete");

    Ok(())
}
