//! Health endpoint, served on every listener.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::debug;

/// Health check handler
async fn health() -> impl IntoResponse {
    debug!("Received health request");
    (StatusCode::OK, Json(json!({"status": "RUNNING"})))
}

/// Create the health router
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}
