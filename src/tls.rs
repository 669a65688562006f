//! TLS transport configuration (§6 "tls"), built on `rustls` the way the
//! teacher wires up its `tls-rustls` feature.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::types::{ErrorKind, RedisError, RedisResult};

/// How strictly the TLS peer's certificate is checked.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Validate against the platform's native trust store (default).
    #[default]
    Secure,
    /// Skip certificate verification entirely. Only ever meant for tests
    /// against a self-signed server; never the default.
    Insecure,
}

/// Builds the `rustls::ClientConfig` used by the async transport.
pub fn build_client_config(mode: &TlsMode) -> RedisResult<Arc<ClientConfig>> {
    let config = match mode {
        TlsMode::Secure => {
            let mut roots = RootCertStore::empty();
            let native = rustls_native_certs::load_native_certs();
            for cert in native.certs {
                // A handful of malformed vendor certs are common in the wild;
                // skip them rather than failing the whole connection.
                let _ = roots.add(cert);
            }
            if roots.is_empty() {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
        TlsMode::Insecure => {
            tracing::warn!("TLS certificate verification is disabled; do not use against production servers");
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        }
    };
    Ok(Arc::new(config))
}

pub fn server_name(host: &str) -> RedisResult<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|_| RedisError::new(ErrorKind::InvalidClientConfig, format!("invalid TLS server name: {host}")))
}

#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
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
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_mode_builds_a_client_config() {
        build_client_config(&TlsMode::Secure).unwrap();
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        assert!(server_name("not a hostname!").is_err());
        assert!(server_name("redis.example.com").is_ok());
    }
}
