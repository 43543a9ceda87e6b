//! Spyglass
//!
//! Observes a serverless backend from its integration tests. `instrument`
//! prepares a topology for deployment; `serve` runs the relay that turns
//! forwarded events into envelopes on the live channel.

mod api;
mod config;
mod instrument;
mod server;
mod shutdown;
mod state;

use clap::{Parser, Subcommand};
use config::ConfigLoader;
use instrument::InstrumentArgs;
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Spyglass - live events from a serverless backend, for integration tests
#[derive(Parser, Debug)]
#[command(name = "spyglass")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay: forwarding endpoints plus the live channel
    Serve(ServeArgs),
    /// Instrument a topology description and write its artifacts
    Instrument(InstrumentArgs),
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./spyglass-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    match args.command {
        Command::Serve(serve) => run_serve(serve).await,
        Command::Instrument(instrument_args) => {
            let instrumentation = instrument::run(&instrument_args).map_err(|e| {
                tracing::error!("Instrumentation failed: {:#}", e);
                e
            })?;
            tracing::info!(
                endpoints = instrumentation.pool.len(),
                service_keys = instrumentation.service_keys().len(),
                "Topology instrumented"
            );
            Ok(())
        }
    }
}

async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    tracing::info!("Starting spyglass relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = loaded_config.server.listen;
    let channel_buffer = loaded_config.server.channel_buffer;
    tracing::info!("Configuration loaded from {:?}", args.config);

    let shared_config = loaded_config.into_shared();

    // Create application state
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(shared_config, channel_buffer, shutdown_rx);

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server; live sessions close once the signal arrives
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, async move {
        shutdown_signal().await;
        shutdown_tx.send_replace(true);
    })
    .await;

    // Signal the config reload handler to stop
    reload_notify.notify_one();
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
