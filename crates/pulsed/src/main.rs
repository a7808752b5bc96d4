//! # pulsed
//!
//! Pulse broadcast server daemon — wires the verifier, metrics producer,
//! and server together and runs until a shutdown signal.

#![deny(unsafe_code)]

mod producer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use pulse_auth::JwtVerifier;
use pulse_server::ws::registry::ConnectionRegistry;
use pulse_server::{PulseServer, ServerConfig, shutdown};

use crate::producer::RuntimeMetricsProducer;

/// Pulse real-time broadcast server.
#[derive(Parser, Debug)]
#[command(name = "pulsed", about = "Pulse real-time broadcast server")]
struct Cli {
    /// Host to bind (overrides PULSE_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides PULSE_PORT; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent connections.
    #[arg(long)]
    max_connections: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Defaults, then env, then CLI flags.
    let mut config = ServerConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    if config.uses_default_secret() {
        warn!("using the development JWT secret; set PULSE_JWT_SECRET in production");
    }
    let grace = Duration::from_secs(config.shutdown_grace_secs);

    let prometheus = pulse_server::metrics::install_recorder();

    let registry = Arc::new(ConnectionRegistry::new());
    let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
    let metrics_producer = Arc::new(RuntimeMetricsProducer::new(registry.clone()));

    let server = PulseServer::new(config, registry.clone(), verifier, metrics_producer)
        .with_prometheus(prometheus);

    // Shutdown signal: cancel the coordinator; sessions close themselves.
    let coordinator = server.shutdown().clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            coordinator.shutdown();
        }
    }));

    server.run().await?;

    if !shutdown::wait_for_drain(&registry, grace).await {
        warn!("exiting with connections still open");
    }
    info!("server stopped");
    Ok(())
}
