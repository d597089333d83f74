// ABOUTME: runs the privileged daemon that validates and executes structured action plans.
// ABOUTME: exposes a local unix socket and writes an audit log for each request.

mod actions;
mod audit;
mod config;
mod dispatch;
mod policy;
mod server;

use std::sync::Arc;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Args, DaemonConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("planguardd=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = DaemonConfig::from_args(args)?;
    info!(?config, "starting");

    server::serve(Arc::new(config), shutdown_signal()).await
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable, stopping on ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
        _ = terminate.recv() => info!("SIGTERM received, shutting down"),
    }
}
