//! drain-webhook entrypoint.
//!
//! Loads the configuration, provisions the listener set, starts the server,
//! and runs the certificate watch until a shutdown signal arrives.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use drain_webhook::{app_router, watch, Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("drain_webhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    info!("Starting drain-webhook");

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        error!(?e, "Failed to install default TLS crypto provider");
    }

    let config = Config::from_env()?;
    config.log_summary();

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let app = app_router(client.clone(), &config);
    let server = Arc::new(Server::provision(config.clone(), app).await?);
    server.start().await?;

    let watch_handle = if config.certificate_watch_enabled {
        let watch_server = server.clone();
        let watch_config = config.clone();
        Some(tokio::spawn(async move {
            watch::run(client, watch_config, watch_server).await;
        }))
    } else {
        info!("Certificate watch disabled");
        None
    };

    shutdown_signal().await;
    info!("Received shutdown signal, stopping server");

    if let Some(handle) = watch_handle {
        handle.abort();
    }
    server.stop().await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the server cannot shut
/// down gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
