//! Process configuration.
//!
//! All settings are read once at startup from environment variables and held
//! in an immutable [`Config`] value that is passed into each component at
//! construction.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

/// Default port for the plaintext listener
pub const DEFAULT_HTTP_PORT: u16 = 8080;
/// Default port for the secure listener
pub const DEFAULT_HTTPS_PORT: u16 = 8443;
/// Default location of the generated keystore file
pub const DEFAULT_KEYSTORE_PATH: &str = "/tmp/drain-webhook-keystore.p12";

/// Errors raised while building the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment value could not be parsed
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// Certificate watch is enabled but a required setting is missing
    #[error("{key} is required when the certificate watch is enabled")]
    MissingWatchSetting { key: &'static str },
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the plaintext listener
    pub http_port: u16,
    /// Port for the secure listener (bound only when material is present)
    pub https_port: u16,
    /// Path to the PEM certificate file; empty means no HTTPS
    pub https_cert_path: String,
    /// Path to the PEM private key file; empty means no HTTPS
    pub https_key_path: String,
    /// Where the generated keystore file is written
    pub keystore_path: PathBuf,
    /// Whether evicted Kafka broker pods are marked for a rolling update
    pub drain_kafka: bool,
    /// Whether evicted ZooKeeper pods are marked for a rolling update
    pub drain_zookeeper: bool,
    /// Whether evictions of drained pods are denied
    pub deny_eviction: bool,
    /// Whether the certificate Secret watch runs
    pub certificate_watch_enabled: bool,
    /// Namespace of the watched Secret
    pub certificate_watch_namespace: Option<String>,
    /// Name of the watched Secret
    pub certificate_watch_secret_name: Option<String>,
    /// Secret keys whose content changes trigger a rotation
    pub certificate_watch_secret_keys: Vec<String>,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Missing keys
    /// fall back to their defaults.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            http_port: parse_or(&lookup, "HTTP_PORT", DEFAULT_HTTP_PORT)?,
            https_port: parse_or(&lookup, "HTTPS_PORT", DEFAULT_HTTPS_PORT)?,
            https_cert_path: lookup("HTTPS_CERT_PATH").unwrap_or_default(),
            https_key_path: lookup("HTTPS_KEY_PATH").unwrap_or_default(),
            keystore_path: lookup("KEYSTORE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_KEYSTORE_PATH)),
            drain_kafka: parse_or(&lookup, "DRAIN_KAFKA", true)?,
            drain_zookeeper: parse_or(&lookup, "DRAIN_ZOOKEEPER", true)?,
            deny_eviction: parse_or(&lookup, "DENY_EVICTION", true)?,
            certificate_watch_enabled: parse_or(&lookup, "CERTIFICATE_WATCH_ENABLED", false)?,
            certificate_watch_namespace: lookup("CERTIFICATE_WATCH_NAMESPACE")
                .filter(|v| !v.is_empty()),
            certificate_watch_secret_name: lookup("CERTIFICATE_WATCH_SECRET_NAME")
                .filter(|v| !v.is_empty()),
            certificate_watch_secret_keys: lookup("CERTIFICATE_WATCH_SECRET_KEYS")
                .map(|v| {
                    v.split(',')
                        .map(|key| key.trim().to_string())
                        .filter(|key| !key.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate_watch_enabled {
            if self.certificate_watch_namespace.is_none() {
                return Err(ConfigError::MissingWatchSetting {
                    key: "CERTIFICATE_WATCH_NAMESPACE",
                });
            }
            if self.certificate_watch_secret_name.is_none() {
                return Err(ConfigError::MissingWatchSetting {
                    key: "CERTIFICATE_WATCH_SECRET_NAME",
                });
            }
            if self.certificate_watch_secret_keys.is_empty() {
                return Err(ConfigError::MissingWatchSetting {
                    key: "CERTIFICATE_WATCH_SECRET_KEYS",
                });
            }
        }
        Ok(())
    }

    /// Log the effective configuration at startup.
    pub fn log_summary(&self) {
        info!(
            http_port = self.http_port,
            https_port = self.https_port,
            cert_path = %self.https_cert_path,
            key_path = %self.https_key_path,
            keystore_path = %self.keystore_path.display(),
            drain_kafka = self.drain_kafka,
            drain_zookeeper = self.drain_zookeeper,
            deny_eviction = self.deny_eviction,
            certificate_watch = self.certificate_watch_enabled,
            "Configuration loaded"
        );
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}
