//! TLS certificate expiry checks for HTTPS source endpoints.
//!
//! The agent attaches a [`proto::CertStatus`] to each shipped snapshot so
//! the server can evaluate `cert_days_left` alert rules and surface expiry
//! on the dashboard.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::prelude::FromDer;

use crate::config::{AuthMode, Source};
use crate::proto::CertStatus;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Days-left threshold below which a certificate counts as `expiring`.
const EXPIRING_DAYS: i64 = 30;

/// Dials the TLS endpoint of the given source and describes its leaf
/// certificate.
///
/// Returns `None` for non-HTTPS endpoints — there is no certificate to
/// inspect. An unreachable or handshake-refusing host yields a status of
/// `unreachable` rather than an error; the snapshot still ships.
pub async fn check(src: &Source) -> Option<CertStatus> {
    let url = reqwest::Url::parse(&src.endpoint).ok()?;
    if url.scheme() != "https" {
        return None;
    }

    let host = url.host_str()?.to_string();
    let port = url.port().unwrap_or(443);

    let mut status = CertStatus {
        endpoint: src.endpoint.clone(),
        status: "unreachable".into(),
        not_after: String::new(),
        days_left: 0,
        issuer: String::new(),
        auth_type: auth_label(src.auth.mode).into(),
    };

    let Some(leaf) = fetch_leaf_certificate(&host, port).await else {
        return Some(status);
    };

    let Ok((_, cert)) = x509_parser::certificate::X509Certificate::from_der(&leaf) else {
        debug!("security: unparseable peer certificate: endpoint={}", src.endpoint);
        return Some(status);
    };

    let not_after = cert.validity().not_after.timestamp();
    let days_left = (not_after - Utc::now().timestamp()) / 86_400;

    if let Some(ts) = Utc.timestamp_opt(not_after, 0).single() {
        status.not_after = ts.to_rfc3339();
    }
    status.days_left = days_left as i32;
    status.issuer = cert
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();

    status.status = if days_left <= 0 {
        "expired"
    } else if days_left <= EXPIRING_DAYS {
        "expiring"
    } else {
        "valid"
    }
    .into();

    Some(status)
}

/// Completes a TLS handshake with the host and returns the DER bytes of the
/// presented leaf certificate. Verification is disabled — the point is to
/// *inspect* the certificate, including ones that would fail validation.
async fn fetch_leaf_certificate(host: &str, port: u16) -> Option<CertificateDer<'static>> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string()).ok()?;

    let connect = async {
        let tcp = tokio::net::TcpStream::connect((host, port)).await.ok()?;
        TlsConnector::from(Arc::new(config))
            .connect(server_name, tcp)
            .await
            .ok()
    };

    let stream = tokio::time::timeout(DIAL_TIMEOUT, connect).await.ok()??;
    let (_, conn) = stream.get_ref();
    conn.peer_certificates()
        .and_then(|certs| certs.first())
        .map(|c| c.clone().into_owned())
}

fn auth_label(mode: AuthMode) -> &'static str {
    match mode {
        AuthMode::None => "none",
        AuthMode::Basic => "basic",
        AuthMode::Apikey => "apikey",
        AuthMode::Bearer => "bearer",
        AuthMode::Mtls => "mtls",
    }
}

/// Certificate verifier that accepts every chain. Used only to read the
/// peer certificate; nothing sensitive rides on this connection.
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
