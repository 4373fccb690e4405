//! atelierd — Atelier daemon.
//!
//! Serves the generation [`Gateway`](atelier::Gateway) over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use atelier::Atelier;
use atelier::server::config::{Config, Secrets};

/// Atelier daemon — image, diagram and video generation gateway.
#[derive(Parser)]
#[command(name = "atelierd")]
#[command(version = atelier::PKG_VERSION)]
#[command(about = "Atelier generation gateway daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "ATELIER_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;

    let gateway = config.configure(Atelier::builder(), &secrets).build()?;

    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| atelier::AtelierError::Configuration(format!("Invalid address: {e}")))?;

    let app = atelier::server::router(Arc::new(gateway), &config.server.limits);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(version = atelier::version_string(), %addr, "atelierd starting");

    let grace = config.server.limits.shutdown_grace();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!(grace_secs = grace.as_secs(), "shutdown requested, draining in-flight requests");
    let _ = stop_tx.send(());

    drain(server, grace).await
}

/// Wait for the server to finish, abandoning in-flight requests after `grace`.
async fn drain(
    server: tokio::task::JoinHandle<std::io::Result<()>>,
    grace: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    match tokio::time::timeout(grace, server).await {
        Ok(joined) => {
            joined??;
            info!("atelierd stopped");
        }
        Err(_) => warn!("grace period elapsed, exiting with requests in flight"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
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
                warn!(error = %e, "failed to listen for SIGTERM");
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
}
