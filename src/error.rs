//! Error types for TLS material handling and the server lifecycle.
//!
//! Every variant carries enough context for an operator to fix the
//! configuration without reading the code.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error type for keystore conversion, listener provisioning, and rotation
#[derive(Error, Debug)]
pub enum ServerError {
    /// Certificate or key file is not present. Valid at provisioning time
    /// (the secure listener is simply omitted); reported when rotation is
    /// invoked against missing files.
    #[error("TLS material absent: {0}")]
    MaterialAbsent(String),

    /// File exists but could not be opened or read
    #[error("cannot read TLS material from {path}: {source}")]
    MaterialUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Content is not valid PEM / X.509 / key structure
    #[error("malformed TLS material in {path}: {reason}")]
    MaterialMalformed { path: PathBuf, reason: String },

    /// Parsed key object is neither a PKCS#8 key-info nor a traditional
    /// RSA/EC key-pair encoding
    #[error("unsupported private key type in {path}: found {kind}")]
    KeyTypeUnsupported { path: PathBuf, kind: &'static str },

    /// Keystore file could not be persisted
    #[error("cannot write keystore to {path}: {source}")]
    KeyStoreWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A listener could not be bound at startup
    #[error("failed to bind {listener} listener on port {port}")]
    ListenerBindFailed { listener: &'static str, port: u16 },

    /// Rotation was requested but no secure listener was provisioned
    #[error("no secure listener to rotate")]
    SecureListenerAbsent,

    /// Rotation was requested while the server is not running
    #[error("server is not running")]
    NotRunning,
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
