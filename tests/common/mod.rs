//! Shared fixtures for integration tests: throwaway certificate material,
//! a minimal HTTP client, and a TLS client that reports the certificate the
//! server presented.

#![allow(dead_code, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::{DigitallySignedStruct, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

static INIT: Once = Once::new();

/// Install the process-wide TLS crypto provider once.
pub fn init_crypto() {
    INIT.call_once(|| {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

/// Connectable address for a listener bound on the wildcard interface.
pub fn local(addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], addr.port()))
}

/// A self-signed certificate/key pair written into a temporary directory
pub struct TestMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_der: Vec<u8>,
    _dir: tempfile::TempDir,
}

/// Generate a fresh self-signed pair (PKCS#8 PEM key) on disk.
pub fn self_signed_material() -> TestMaterial {
    let rcgen::CertifiedKey { cert, signing_key: key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("tls.crt");
    let key_path = dir.path().join("tls.key");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    TestMaterial {
        cert_path,
        key_path,
        cert_der: cert.der().as_ref().to_vec(),
        _dir: dir,
    }
}

/// Overwrite the pair in place with freshly generated material and return
/// the new certificate's DER.
pub fn regenerate(material: &TestMaterial) -> Vec<u8> {
    let rcgen::CertifiedKey { cert, signing_key: key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(&material.cert_path, cert.pem()).unwrap();
    std::fs::write(&material.key_path, key_pair.serialize_pem()).unwrap();
    cert.der().as_ref().to_vec()
}

/// Plain-HTTP GET returning (status, body).
pub async fn http_get(addr: SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    send_request(&mut stream, path).await;
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    parse_response(&raw)
}

/// Open a TLS connection that accepts any certificate; returns the stream
/// and the certificate the server presented.
pub async fn tls_connect(addr: SocketAddr) -> (TlsStream<TcpStream>, Vec<u8>) {
    init_crypto();
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from(String::from("localhost")).unwrap();
    let stream = connector.connect(server_name, tcp).await.unwrap();
    let peer = {
        let (_, connection) = stream.get_ref();
        connection.peer_certificates().unwrap()[0].as_ref().to_vec()
    };
    (stream, peer)
}

/// Send a GET over an established TLS stream and read the full response.
pub async fn tls_request(stream: &mut TlsStream<TcpStream>, path: &str) -> (u16, String) {
    send_request(stream, path).await;
    let mut raw = Vec::new();
    // Tolerate a missing close_notify; the response is complete either way.
    let _ = stream.read_to_end(&mut raw).await;
    parse_response(&raw)
}

async fn send_request<S: AsyncWriteExt + Unpin>(stream: &mut S, path: &str) {
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
}

fn parse_response(raw: &[u8]) -> (u16, String) {
    let text = String::from_utf8_lossy(raw);
    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = text
        .split("\r\n\r\n")
        .nth(1)
        .unwrap_or("")
        .trim()
        .to_string();
    (status, body)
}

/// Accepts whatever certificate the server presents so tests can assert on
/// it afterwards. Signatures are still verified.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::aws_lc_rs::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
