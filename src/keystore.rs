//! Conversion of PEM certificate/key material into a PKCS#12 keystore.
//!
//! The webhook receives its HTTPS identity as a PEM certificate and private
//! key, typically mounted from a Secret. The secure listener consumes a
//! password-protected PKCS#12 keystore loaded from a file, so this module
//! converts between the two: [`build`] produces the keystore bytes and
//! [`load`] reads a keystore file back into DER material for the listener.
//!
//! Two PEM key encodings are accepted: a bare PKCS#8 private-key-info
//! structure, and the traditional RSA/EC key-pair encodings from which only
//! the private half is used. The PEM parser tags each entry, so the
//! distinction is a single `match` rather than runtime type inspection.

use std::fmt;
use std::fs;
use std::path::Path;

use openssl::ec::EcKey;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::X509;
use rustls_pemfile::Item;

use crate::error::ServerError;

/// Friendly name the certificate/key pair is stored under
pub const KEYSTORE_ALIAS: &str = "drain-webhook";

/// A serialized PKCS#12 keystore and the password protecting it.
///
/// The password is generated fresh for every conversion and lives only in
/// memory; `Debug` output never contains it.
pub struct KeyStoreBlob {
    bytes: Vec<u8>,
    password: String,
}

impl KeyStoreBlob {
    /// The serialized keystore
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The password protecting the keystore
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for KeyStoreBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreBlob")
            .field("bytes", &self.bytes.len())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Certificate chain and private key in DER form, ready for the TLS listener
#[derive(Debug)]
pub struct TlsIdentity {
    /// Leaf certificate first
    pub cert_chain: Vec<Vec<u8>>,
    /// PKCS#8-encoded private key
    pub key: Vec<u8>,
}

/// Convert a PEM certificate and private key into a PKCS#12 keystore.
///
/// The converter never writes to disk; persisting the blob is the caller's
/// responsibility. The decoded certificate and key are dropped as soon as
/// the container bytes are produced.
pub fn build(
    cert_path: &Path,
    key_path: &Path,
    password: String,
) -> Result<KeyStoreBlob, ServerError> {
    let certificate = load_certificate(cert_path)?;
    let private_key = load_private_key(key_path)?;

    let pkcs12 = Pkcs12::builder()
        .name(KEYSTORE_ALIAS)
        .pkey(&private_key)
        .cert(&certificate)
        .build2(&password)
        .map_err(|e| ServerError::MaterialMalformed {
            path: key_path.to_path_buf(),
            reason: format!("keystore assembly failed: {e}"),
        })?;
    let bytes = pkcs12.to_der().map_err(|e| ServerError::MaterialMalformed {
        path: key_path.to_path_buf(),
        reason: format!("keystore encoding failed: {e}"),
    })?;

    Ok(KeyStoreBlob { bytes, password })
}

/// Load a keystore file back into listener-ready DER material.
pub fn load(path: &Path, password: &str) -> Result<TlsIdentity, ServerError> {
    let bytes = fs::read(path).map_err(|source| ServerError::MaterialUnreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let malformed = |reason: String| ServerError::MaterialMalformed {
        path: path.to_path_buf(),
        reason,
    };

    let parsed = Pkcs12::from_der(&bytes)
        .and_then(|keystore| keystore.parse2(password))
        .map_err(|e| malformed(e.to_string()))?;

    let certificate = parsed
        .cert
        .ok_or_else(|| malformed("keystore has no certificate entry".to_string()))?;
    let private_key = parsed
        .pkey
        .ok_or_else(|| malformed("keystore has no private key entry".to_string()))?;

    let mut cert_chain = vec![certificate.to_der().map_err(|e| malformed(e.to_string()))?];
    if let Some(extra) = parsed.ca {
        for ca in extra {
            cert_chain.push(ca.to_der().map_err(|e| malformed(e.to_string()))?);
        }
    }
    let key = private_key
        .private_key_to_pkcs8()
        .map_err(|e| malformed(e.to_string()))?;

    Ok(TlsIdentity { cert_chain, key })
}

/// Parse the first PEM entry of the certificate file as an X.509
/// certificate. Entries beyond the first are not supported and are ignored.
fn load_certificate(path: &Path) -> Result<X509, ServerError> {
    let pem = fs::read(path).map_err(|source| ServerError::MaterialUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    match read_first_item(&pem, path)? {
        Item::X509Certificate(der) => {
            X509::from_der(der.as_ref()).map_err(|e| ServerError::MaterialMalformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
        other => Err(ServerError::MaterialMalformed {
            path: path.to_path_buf(),
            reason: format!("expected a certificate, found {}", item_kind(&other)),
        }),
    }
}

fn load_private_key(path: &Path) -> Result<PKey<Private>, ServerError> {
    let pem = fs::read(path).map_err(|source| ServerError::MaterialUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let key = match read_first_item(&pem, path)? {
        Item::Pkcs8Key(der) => PKey::private_key_from_pkcs8(der.secret_pkcs8_der()),
        Item::Pkcs1Key(der) => {
            Rsa::private_key_from_der(der.secret_pkcs1_der()).and_then(PKey::from_rsa)
        }
        Item::Sec1Key(der) => {
            EcKey::private_key_from_der(der.secret_sec1_der()).and_then(PKey::from_ec_key)
        }
        other => {
            return Err(ServerError::KeyTypeUnsupported {
                path: path.to_path_buf(),
                kind: item_kind(&other),
            })
        }
    };
    key.map_err(|e| ServerError::MaterialMalformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn read_first_item(pem: &[u8], path: &Path) -> Result<Item, ServerError> {
    match rustls_pemfile::read_one_from_slice(pem) {
        Ok(Some((item, _rest))) => Ok(item),
        Ok(None) => Err(ServerError::MaterialMalformed {
            path: path.to_path_buf(),
            reason: "no PEM object found".to_string(),
        }),
        Err(e) => Err(ServerError::MaterialMalformed {
            path: path.to_path_buf(),
            reason: format!("{e:?}"),
        }),
    }
}

#[cfg(test)]
pub(crate) fn test_blob(bytes: Vec<u8>) -> KeyStoreBlob {
    KeyStoreBlob {
        bytes,
        password: "test".to_string(),
    }
}

fn item_kind(item: &Item) -> &'static str {
    match item {
        Item::X509Certificate(_) => "certificate",
        Item::Pkcs8Key(_) => "PKCS#8 private key",
        Item::Pkcs1Key(_) => "RSA private key",
        Item::Sec1Key(_) => "EC private key",
        Item::Crl(_) => "certificate revocation list",
        Item::Csr(_) => "certificate signing request",
        _ => "unrecognized PEM object",
    }
}
