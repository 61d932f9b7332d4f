//! HTTP/HTTPS server lifecycle.
//!
//! Builds the listener set (a plaintext listener, plus a secure listener when
//! certificate material is configured), starts and stops the listeners as a
//! unit, and swaps the secure listener's identity in place on rotation.
//!
//! The secure listener never loads PEM files directly: the material is first
//! converted into a password-protected PKCS#12 keystore, persisted to a
//! private file, and loaded back from that file (see [`crate::keystore`]).

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::ServerError;
use crate::keystore;

/// How long `stop` waits for in-flight requests before closing connections
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Paths to the PEM certificate and private key for the secure listener
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub certificate_path: String,
    pub private_key_path: String,
}

impl CertificateMaterial {
    pub fn from_config(config: &Config) -> Self {
        Self {
            certificate_path: config.https_cert_path.clone(),
            private_key_path: config.https_key_path.clone(),
        }
    }

    /// Both paths name existing regular files. Empty paths and directories
    /// count as absent, not as errors.
    pub fn is_present(&self) -> bool {
        file_exists(&self.certificate_path) && file_exists(&self.private_key_path)
    }
}

fn file_exists(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let path = Path::new(path);
    path.exists() && !path.is_dir()
}

/// The listeners the server binds: configured addresses before `start`,
/// bound addresses while running. The secure member's port is also the port
/// advertised for HTTPS, so the two can never disagree.
#[derive(Debug, Clone)]
pub struct ListenerSet {
    pub plaintext: SocketAddr,
    pub secure: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Starting,
    Running,
}

struct Lifecycle {
    state: LifecycleState,
    listeners: ListenerSet,
    handles: Vec<Handle>,
    tasks: Vec<JoinHandle<()>>,
}

/// Health-and-webhook server with an always-on plaintext listener and an
/// optional secure listener whose identity can be rotated in place.
pub struct Server {
    config: Config,
    router: Router,
    tls: Option<RustlsConfig>,
    lifecycle: Mutex<Lifecycle>,
    rotation: Mutex<()>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Build the listener set from the configuration.
    ///
    /// A plaintext listener is always configured. A secure listener is added
    /// only when both PEM files are present; present-but-invalid material is
    /// a fatal error rather than a silent fallback to plaintext-only.
    ///
    /// The given router is served on every listener.
    pub async fn provision(config: Config, app: Router) -> Result<Self, ServerError> {
        let material = CertificateMaterial::from_config(&config);

        let (tls, secure) = if material.is_present() {
            let identity = convert_and_store(&material, &config.keystore_path)?;
            let tls = RustlsConfig::from_der(identity.cert_chain, identity.key)
                .await
                .map_err(|e| ServerError::MaterialMalformed {
                    path: config.keystore_path.clone(),
                    reason: e.to_string(),
                })?;
            (
                Some(tls),
                Some(SocketAddr::from(([0, 0, 0, 0], config.https_port))),
            )
        } else {
            info!("HTTPS certificate or key not configured, secure listener disabled");
            (None, None)
        };

        let listeners = ListenerSet {
            plaintext: SocketAddr::from(([0, 0, 0, 0], config.http_port)),
            secure,
        };

        Ok(Self {
            config,
            router: app,
            tls,
            lifecycle: Mutex::new(Lifecycle {
                state: LifecycleState::Stopped,
                listeners,
                handles: Vec::new(),
                tasks: Vec::new(),
            }),
            rotation: Mutex::new(()),
        })
    }

    /// The current listener set.
    pub async fn listeners(&self) -> ListenerSet {
        self.lifecycle.lock().await.listeners.clone()
    }

    /// Bind every listener in the set, blocking until each is confirmed up.
    ///
    /// Any bind failure aborts startup: listeners that were already bound
    /// are shut down again before the error is returned.
    pub async fn start(&self) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != LifecycleState::Stopped {
            warn!("start requested while the server is already running");
            return Ok(());
        }
        lifecycle.state = LifecycleState::Starting;

        let addr = lifecycle.listeners.plaintext;
        let handle = Handle::new();
        let task = tokio::spawn({
            let handle = handle.clone();
            let app = self.router.clone();
            async move {
                if let Err(e) = axum_server::bind(addr)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                {
                    error!(error = %e, "Plaintext listener terminated");
                }
            }
        });
        match handle.listening().await {
            Some(bound) => {
                info!(addr = %bound, "Plaintext listener bound");
                lifecycle.listeners.plaintext = bound;
                lifecycle.handles.push(handle);
                lifecycle.tasks.push(task);
            }
            None => {
                task.abort();
                lifecycle.state = LifecycleState::Stopped;
                return Err(ServerError::ListenerBindFailed {
                    listener: "plaintext",
                    port: addr.port(),
                });
            }
        }

        if let (Some(tls), Some(addr)) = (self.tls.as_ref(), lifecycle.listeners.secure) {
            let handle = Handle::new();
            let task = tokio::spawn({
                let handle = handle.clone();
                let app = self.router.clone();
                let tls = tls.clone();
                async move {
                    if let Err(e) = axum_server::bind_rustls(addr, tls)
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                    {
                        error!(error = %e, "Secure listener terminated");
                    }
                }
            });
            match handle.listening().await {
                Some(bound) => {
                    info!(addr = %bound, "Secure listener bound");
                    lifecycle.listeners.secure = Some(bound);
                    lifecycle.handles.push(handle);
                    lifecycle.tasks.push(task);
                }
                None => {
                    task.abort();
                    Self::shutdown_locked(&mut lifecycle).await;
                    return Err(ServerError::ListenerBindFailed {
                        listener: "secure",
                        port: addr.port(),
                    });
                }
            }
        }

        lifecycle.state = LifecycleState::Running;
        Ok(())
    }

    /// Release all listeners, blocking until the serve tasks have finished.
    /// Stopping a stopped server is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == LifecycleState::Stopped {
            return;
        }
        info!("Stopping server");
        Self::shutdown_locked(&mut lifecycle).await;
    }

    async fn shutdown_locked(lifecycle: &mut Lifecycle) {
        for handle in lifecycle.handles.drain(..) {
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        }
        for task in lifecycle.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task failed during shutdown");
            }
        }
        lifecycle.state = LifecycleState::Stopped;
    }

    /// Replace the secure listener's identity with freshly converted
    /// material.
    ///
    /// Conversion and the keystore write happen before the swap, so any
    /// failure leaves the previous identity serving. The swap only replaces
    /// the TLS configuration new handshakes read; established connections
    /// keep their negotiated sessions, and the plaintext listener is never
    /// touched. Concurrent callers are serialized: a second rotation queues
    /// behind the one in flight.
    ///
    /// Rotation never binds a port, so it cannot create a secure listener
    /// on a server that was provisioned without one.
    pub async fn rotate(&self, material: &CertificateMaterial) -> Result<(), ServerError> {
        let _serialized = self.rotation.lock().await;

        if self.lifecycle.lock().await.state != LifecycleState::Running {
            return Err(ServerError::NotRunning);
        }
        let tls = self.tls.as_ref().ok_or(ServerError::SecureListenerAbsent)?;
        if !material.is_present() {
            return Err(ServerError::MaterialAbsent(format!(
                "{} or {} is missing",
                material.certificate_path, material.private_key_path
            )));
        }

        let identity = convert_and_store(material, &self.config.keystore_path)?;
        tls.reload_from_der(identity.cert_chain, identity.key)
            .await
            .map_err(|e| ServerError::MaterialMalformed {
                path: self.config.keystore_path.clone(),
                reason: e.to_string(),
            })?;

        info!("Secure listener certificate rotated");
        Ok(())
    }
}

/// Convert the PEM pair into a keystore, persist it, and load the identity
/// back from the keystore file.
fn convert_and_store(
    material: &CertificateMaterial,
    keystore_path: &Path,
) -> Result<keystore::TlsIdentity, ServerError> {
    let password = Uuid::new_v4().to_string();
    let blob = keystore::build(
        Path::new(&material.certificate_path),
        Path::new(&material.private_key_path),
        password,
    )?;
    write_keystore(keystore_path, &blob)?;
    keystore::load(keystore_path, blob.password())
}

/// The keystore file is owner-readable only; its password never leaves
/// memory.
fn write_keystore(path: &Path, blob: &keystore::KeyStoreBlob) -> Result<(), ServerError> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .and_then(|mut file| file.write_all(blob.bytes()))
        .map_err(|source| ServerError::KeyStoreWriteFailed {
            path: path.to_path_buf(),
            source,
        })
}
