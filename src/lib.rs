//! drain-webhook library crate
//!
//! Exports the configuration, the PEM-to-keystore converter, the HTTP/HTTPS
//! server lifecycle, the certificate watch, and the eviction webhook.

pub mod config;
pub mod error;
pub mod health;
pub mod keystore;
pub mod server;
pub mod watch;
pub mod webhooks;

pub use config::Config;
pub use error::ServerError;
pub use server::{CertificateMaterial, ListenerSet, Server};

use std::sync::Arc;

use axum::Router;
use kube::Client;

/// Assemble the full request router: health checks plus the eviction
/// webhook. The server registers this router on every listener it binds.
pub fn app_router(client: Client, config: &Config) -> Router {
    let state = Arc::new(webhooks::WebhookState::new(client, config.clone()));
    Router::new()
        .merge(health::router())
        .merge(webhooks::router(state))
}
