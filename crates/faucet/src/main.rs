//! Faucet service binary

use anyhow::Context;
use clap::Parser;
use spout_common::{init_logging, load_layered};
use spout_faucet::api::{self, AppState};
use spout_faucet::config::RawSettings;
use spout_faucet::gateway::NeoRpcGateway;
use spout_faucet::ledger::SledLedger;
use spout_faucet::{FaucetConfig, FaucetService};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Faucet service CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path. May be repeated; later files win, the environment wins over all.
    #[arg(short, long)]
    config: Vec<PathBuf>,

    /// Listen host
    #[arg(long, env = "FAUCET_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "FAUCET_PORT")]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let raw: RawSettings = load_layered(args.config.as_slice())?;
    let mut config = FaucetConfig::from_settings(raw)?;

    // Override with CLI arguments
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    let _logging = init_logging(&config.logging)?;

    info!("Starting {} faucet v{}", config.token.symbol, env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Token: {} ({}) {}", config.token.name, config.token.symbol, config.token.script_hash);
    info!("  Faucet wallet: {}", config.wallet.address);
    info!("  RPC URL: {}", config.rpc_url);
    info!("  Drip amount: {} {}", config.drip_amount, config.token.symbol);
    info!(
        "  Limits: {} per IP, {} per wallet every {}s",
        config.ip_max_claims,
        config.wallet_max_claims,
        config.claim_window.as_secs()
    );
    info!("  Client IP source: {:?}", config.client_ip_source);

    let ledger = Arc::new(SledLedger::open(&config.db_path)?);
    info!("Ledger opened at: {}", config.db_path);

    let gateway = NeoRpcGateway::new(
        config.rpc_url.clone(),
        config.token.clone(),
        config.wallet.address.clone(),
    );
    gateway
        .open_wallet(&config.wallet.path, &config.wallet.password)
        .await
        .context("Could not open the faucet wallet")?;

    let service = Arc::new(FaucetService::new(
        config.admission()?,
        ledger.clone(),
        Arc::new(gateway),
    )?);
    info!("Faucet service initialized");

    // Start cleanup task
    let cleanup = service.clone();
    let cleanup_interval = config.cleanup_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match cleanup.purge_expired().await {
                Ok(count) => info!("Cleaned up {} expired records", count),
                Err(e) => warn!("Cleanup failed: {}", e),
            }
        }
    });

    let burst = NonZeroU32::new(config.burst_per_minute)
        .context("FAUCET_BURST_PER_MINUTE must be at least 1")?;
    let state = AppState::new(
        service,
        config.token.clone(),
        config.client_ip_source.clone(),
        burst,
        config.receipt_ttl,
    )?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = ledger.flush().await {
        error!("Failed to flush ledger: {}", e);
    }
    info!("Shutting down gracefully");
    Ok(())
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
