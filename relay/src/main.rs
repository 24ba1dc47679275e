//! Tandem rendezvous relay
//!
//! Runs somewhere both peers can reach and lets them find each other:
//! 1. Each peer registers its id over a WebSocket
//! 2. A controller's offer is forwarded to the headless peer it names
//! 3. The headless peer's answer (its direct address) goes back
//!
//! Usage:
//!   tandem-relay --port 9000
//!
//! The relay keeps no document data; it only tracks who is online.

use anyhow::{Context, Result};
use clap::Parser;
use std::{sync::Arc, time::Duration};
use tandem_relay::{IdentityResponse, RelayState, serve};
use tandem_sync::DEFAULT_RELAY_PATH;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "tandem-relay")]
#[command(about = "Tandem rendezvous relay")]
struct Args {
    /// Port to listen on (HTTP + WebSocket)
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Drop peers silent for this many seconds
    #[arg(long, default_value = "30")]
    heartbeat_timeout_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Tandem relay starting...");
    anyhow::ensure!(
        args.heartbeat_timeout_secs > 0,
        "--heartbeat-timeout-secs must be positive"
    );

    let state = Arc::new(RelayState::new(
        IdentityResponse::default(),
        Duration::from_secs(args.heartbeat_timeout_secs),
    ));

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    let local = listener.local_addr()?;

    println!("\n========================================");
    println!("  Tandem Relay Running");
    println!("========================================");
    println!("  Listening:  {local}");
    println!("  Signaling:  ws://{local}{DEFAULT_RELAY_PATH}");
    println!("  Identity:   http://{local}/api/v1/identity");
    println!("  Heartbeat:  {}s", args.heartbeat_timeout_secs);
    println!("========================================\n");

    serve(listener, state).await.context("relay server failed")
}
