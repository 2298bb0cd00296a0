//! TLS material for the QUIC endpoints.
//!
//! TLS 1.3 is mandatory on the wire. When the caller supplies no
//! certificate, a self-signed ECDSA P-256 one is generated at sender
//! construction; receivers accept any server certificate (the protocol
//! authenticates sources at the application layer, not via PKI).

use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, PrivateKey, ServerName};

use crate::error::Result;
use crate::ALPN;

/// Generate a self-signed ECDSA P-256 certificate for `localhost`.
pub(crate) fn generate_self_signed() -> Result<(Certificate, PrivateKey)> {
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]);
    params.alg = &rcgen::PKCS_ECDSA_P256_SHA256;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "omt.local");

    let cert = rcgen::Certificate::from_params(params)?;
    Ok((
        Certificate(cert.serialize_der()?),
        PrivateKey(cert.serialize_private_key_der()),
    ))
}

/// QUIC server configuration with the given certificate chain.
pub(crate) fn server_config(cert: Certificate, key: PrivateKey) -> Result<quinn::ServerConfig> {
    let mut crypto = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)?;
    crypto.alpn_protocols = vec![ALPN.to_vec()];
    Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
}

/// QUIC client configuration accepting any server certificate.
pub(crate) fn client_config() -> quinn::ClientConfig {
    let mut crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];
    quinn::ClientConfig::new(Arc::new(crypto))
}

struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_generation() {
        let (cert, key) = generate_self_signed().unwrap();
        assert!(!cert.0.is_empty());
        assert!(!key.0.is_empty());
        // Must be loadable into a server config
        assert!(server_config(cert, key).is_ok());
    }
}
