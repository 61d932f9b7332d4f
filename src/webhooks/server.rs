//! Eviction webhook endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Patch, PatchParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use kube::Client;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::webhooks::policies::{evaluate, DrainContext};

/// Annotation that asks the managing operator to roll the pod
pub const ROLLING_UPDATE_ANNOTATION: &str = "drain-webhook.io/manual-rolling-update";

/// Shared state for the eviction handler
pub struct WebhookState {
    client: Client,
    config: Config,
}

impl WebhookState {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }
}

/// Create the webhook router
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/drainer", post(drain))
        .with_state(state)
}

/// Eviction admission handler.
///
/// Evictions arrive as AdmissionReview requests against the pod's eviction
/// subresource; the request's name and namespace identify the pod.
async fn drain(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<DynamicObject>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("invalid AdmissionReview: {e}"))
                        .into_review(),
                ),
            );
        }
    };

    let pod_name = request.name.clone();
    let namespace = request
        .namespace
        .clone()
        .unwrap_or_else(|| "default".to_string());
    debug!(
        uid = %request.uid,
        pod = %pod_name,
        namespace = %namespace,
        "Processing eviction request"
    );

    let pods: Api<Pod> = Api::namespaced(state.client.clone(), &namespace);
    let pod = match pods.get_opt(&pod_name).await {
        Ok(Some(pod)) => pod,
        Ok(None) => {
            info!(pod = %pod_name, "Pod no longer exists, eviction allowed");
            return allowed(&request);
        }
        Err(e) => {
            error!(pod = %pod_name, error = %e, "Failed to fetch pod, eviction allowed");
            return allowed(&request);
        }
    };

    let labels = pod.metadata.labels.clone().unwrap_or_default();
    let decision = evaluate(&DrainContext::new(&labels, &state.config));

    if decision.drains() && !request.dry_run {
        match annotate_for_rolling_update(&pods, &pod_name).await {
            Ok(_) => info!(pod = %pod_name, "Pod marked for rolling update"),
            Err(e) => {
                warn!(pod = %pod_name, error = %e, "Failed to annotate pod for rolling update")
            }
        }
    }

    if decision.denies() {
        info!(pod = %pod_name, "Eviction denied, pod will be rolled by its operator");
        return (
            StatusCode::OK,
            Json(
                AdmissionResponse::from(&request)
                    .deny(format!(
                        "pod {pod_name} is drained by its operator; eviction is denied"
                    ))
                    .into_review(),
            ),
        );
    }

    info!(pod = %pod_name, "Eviction allowed");
    allowed(&request)
}

fn allowed(
    request: &AdmissionRequest<DynamicObject>,
) -> (StatusCode, Json<AdmissionReview<DynamicObject>>) {
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(request).into_review()),
    )
}

async fn annotate_for_rolling_update(pods: &Api<Pod>, name: &str) -> kube::Result<Pod> {
    let patch = json!({"metadata": {"annotations": {ROLLING_UPDATE_ANNOTATION: "true"}}});
    pods.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
}
