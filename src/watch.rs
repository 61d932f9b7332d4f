//! Certificate watch.
//!
//! Watches the Secret holding the webhook's TLS material and asks the server
//! to rotate its secure listener when the watched keys change. The watch only
//! decides *when* to rotate; conversion and the listener swap stay in the
//! server.

use std::pin::pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use openssl::sha::Sha256;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::server::{CertificateMaterial, Server};

/// Run the certificate watch until the stream ends.
///
/// The `certificate_watch_*` settings must have been validated beforehand
/// (see [`Config::from_env`]).
pub async fn run(client: Client, config: Config, server: Arc<Server>) {
    let (Some(namespace), Some(secret_name)) = (
        config.certificate_watch_namespace.clone(),
        config.certificate_watch_secret_name.clone(),
    ) else {
        error!("Certificate watch enabled without namespace and secret settings");
        return;
    };
    let keys = config.certificate_watch_secret_keys.clone();
    let material = CertificateMaterial::from_config(&config);

    let secrets: Api<Secret> = Api::namespaced(client, &namespace);
    let watcher_config =
        watcher::Config::default().fields(&format!("metadata.name={secret_name}"));

    info!(namespace = %namespace, secret = %secret_name, "Starting certificate watch");

    let mut stream = pin!(watcher(secrets, watcher_config)
        .default_backoff()
        .applied_objects());

    // The first event describes the material the server already loaded, so
    // rotation starts with the first changed content hash after that.
    let mut last_seen: Option<[u8; 32]> = None;
    while let Some(event) = stream.next().await {
        let secret = match event {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "Certificate watch error");
                continue;
            }
        };
        let digest = watched_digest(&secret, &keys);
        match last_seen {
            None => debug!(secret = %secret_name, "Recorded initial certificate material"),
            Some(previous) if previous == digest => {
                debug!("Certificate secret unchanged");
            }
            Some(_) => {
                info!(secret = %secret_name, "Certificate material changed, rotating secure listener");
                match server.rotate(&material).await {
                    Ok(()) => info!("Certificate rotation complete"),
                    Err(e) => {
                        error!(error = %e, "Certificate rotation failed, previous identity retained")
                    }
                }
            }
        }
        last_seen = Some(digest);
    }

    error!("Certificate watch stream ended unexpectedly");
}

/// Content hash of the watched keys of the secret.
fn watched_digest(secret: &Secret, keys: &[String]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    if let Some(data) = &secret.data {
        for key in keys {
            hasher.update(key.as_bytes());
            match data.get(key) {
                Some(value) => hasher.update(&value.0),
                None => warn!(key = %key, "Watched key missing from certificate secret"),
            }
        }
    }
    hasher.finish()
}
