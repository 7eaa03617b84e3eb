//! # Overseer - Tessera Coordinator
//!
//! The control-plane core of Tessera. Aggregates failure information from
//! every participant and hands out deltas, and distributes the cluster
//! configuration to clients by long-poll.
//!
//! ## Architecture
//! ```text
//! Participants ──UDP heartbeat──→ Overseer (FailureAggregator)
//! Clients ──HTTP open-database──→ Overseer (ClientInfoDistributor)
//! Operators ──HTTP /admin──────→ Overseer
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio::sync::{broadcast, watch};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tessera_common::constants::DEFAULT_HEARTBEAT_ADDR;
use tessera_common::{FailureStatus, PeerIdentity};

mod client_info;
mod config;
mod controller;
mod failure;
mod gate;
mod routes;
mod state;

use config::AppConfig;
use failure::{FailureView, HeartbeatService, SyncLoop, SyncLoopConfig, UdpLink};
use gate::VersionGate;
use state::AppState;

/// Tessera Overseer - failure monitoring and client info coordinator
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, global = true, default_value = "false")]
    json_logs: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the coordinator
    Serve(ServeArgs),

    /// Run a participant heartbeat session against a coordinator and log what it learns
    Monitor(MonitorArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "config/overseer.toml")]
    config: String,

    /// HTTP listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    pub listen: Option<String>,

    /// UDP heartbeat bind address (overrides config)
    #[arg(long, env = "HEARTBEAT_BIND")]
    pub heartbeat_bind: Option<String>,

    /// Initial cluster configuration file (overrides config)
    #[arg(long, env = "CLUSTER_CONFIG")]
    pub cluster_config: Option<String>,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Coordinator heartbeat address
    #[arg(long, default_value = DEFAULT_HEARTBEAT_ADDR)]
    controller: SocketAddr,

    /// Addresses identifying this participant (defaults to the local socket)
    #[arg(long = "address")]
    addresses: Vec<SocketAddr>,

    /// Only observe; do not ask to be monitored
    #[arg(long, default_value = "false")]
    observer: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Monitor(args) => monitor(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    info!("🛡️ Starting Tessera Overseer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!("📋 Configuration loaded from {}", args.config);

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Initialize application state
    let state = AppState::new(config.clone())?;
    info!(
        node_id = %state.node_id,
        config_id = %state.distributor.current().id,
        minimum_protocol = %config.minimum_protocol_version,
        "✅ Coordinator state initialized"
    );

    // Spawn the UDP heartbeat receiver
    let socket = HeartbeatService::bind(&config.heartbeat_addr).await?;
    let heartbeat = HeartbeatService::new(
        state.aggregator.clone(),
        state.gate,
        config.failure.sweep_interval(),
    );
    let heartbeat_shutdown = shutdown_tx.subscribe();
    let heartbeat_task =
        tokio::spawn(async move { heartbeat.run(socket, heartbeat_shutdown).await });

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("🚀 Overseer listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let signal_tx = shutdown_tx.clone();
    let shutdown_signal = async move {
        wait_for_ctrl_c().await;
        let _ = signal_tx.send(());
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(());
    heartbeat_task
        .await
        .context("Heartbeat task panicked")?
        .context("Heartbeat service failed")?;

    info!("👋 Overseer shutdown complete");
    Ok(())
}

async fn monitor(args: MonitorArgs) -> Result<()> {
    let link = UdpLink::connect(args.controller, VersionGate::default())
        .await
        .with_context(|| format!("Failed to reach coordinator at {}", args.controller))?;

    let identity = if args.addresses.is_empty() {
        PeerIdentity::single(link.local_addr()?)
    } else {
        PeerIdentity::new(args.addresses)
    };
    info!(
        identity = %identity,
        controller = %args.controller,
        "🔭 Monitoring failure information"
    );

    let config = SyncLoopConfig::new(identity);
    // Held for the whole session; dropping it would freeze our reported status
    let (_status_tx, status_rx) = watch::channel(FailureStatus::available());
    let sync = if args.observer {
        SyncLoop::observer(link, config)
    } else {
        SyncLoop::monitored(link, config, status_rx)
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::spawn(log_view_changes(sync.subscribe()));
    let session = tokio::spawn(sync.run(shutdown_tx.subscribe()));

    wait_for_ctrl_c().await;
    let _ = shutdown_tx.send(());
    session.await.context("Sync loop panicked")?;

    info!("👋 Monitor stopped");
    Ok(())
}

/// Log peers coming up or going down as the view changes
async fn log_view_changes(mut views: watch::Receiver<FailureView>) {
    let mut available: BTreeSet<PeerIdentity> = BTreeSet::new();

    while views.changed().await.is_ok() {
        let (now, version, reachable) = {
            let view = views.borrow_and_update();
            let now: BTreeSet<PeerIdentity> = view.available_peers().into_iter().collect();
            (now, view.since_version(), view.coordinator_reachable())
        };

        for peer in now.difference(&available) {
            info!(peer = %peer, version, "⬆️ Peer available");
        }
        for peer in available.difference(&now) {
            info!(peer = %peer, version, "⬇️ Peer failed");
        }
        if !reachable {
            tracing::warn!("Coordinator unreachable");
        }
        available = now;
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("🛑 Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
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
