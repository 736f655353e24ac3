//! Website Controller
//!
//! Reconciles `Website` custom resources into an nginx Deployment with a
//! git-sync sidecar and a NodePort Service, and reports the Deployment's
//! available replicas back on the Website status.

mod cache;
mod client;
mod config;
mod controller;
mod error;
mod informer;
mod reconciler;
mod recorder;
mod resources;
mod router;

#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::controller::Controller;
use crate::error::ControllerError;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // kube's rustls backend needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting Website Controller");

    let config = ControllerConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", config.workers);
    info!("  Cache sync timeout: {:?}", config.cache_sync_timeout);
    match config.resync_period {
        Some(period) => info!("  Resync period: {:?}", period),
        None => info!("  Resync period: disabled"),
    }

    let client = Client::try_default().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let controller = Controller::new(client, &config, &shutdown);
    controller
        .run(config.workers, config.cache_sync_timeout, shutdown)
        .await?;

    info!("Website Controller exited");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for SIGINT: {}", e);
                    return;
                }
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            return;
        }
        info!("Received SIGINT");
    }

    info!("Shutting down");
    shutdown.cancel();
}
