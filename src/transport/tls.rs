//! rustls client configuration for the Fast engine.
//!
//! Built only when the run needs more than the defaults: skip-verify, a
//! custom CA bundle, or a client certificate pair. A client certificate
//! without a CA bundle keeps the platform's native roots for server
//! verification; the plain-defaults path uses the connector's own native
//! roots instead.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{
    ring, verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::{ConfigError, TlsOptions};

/// Builds a rustls client config honoring the configured TLS material.
pub(crate) fn client_config(tls: &TlsOptions) -> Result<ClientConfig, ConfigError> {
    let provider = Arc::new(ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    let builder = if tls.skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification(algorithms)))
    } else {
        builder.with_root_certificates(trust_roots(tls)?)
    };

    if tls.has_client_pair() {
        let (certs, key) = client_pair(tls)?;
        builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| ConfigError::Tls(format!("could not load X509 key pair: {}", e)))
    } else {
        Ok(builder.with_no_client_auth())
    }
}

/// Trust roots for server verification: the configured CA bundle when set
/// (the sole trust root), otherwise the platform's native roots. The latter
/// matters for client-certificate runs against publicly-trusted servers.
fn trust_roots(tls: &TlsOptions) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();

    match tls.ca.as_deref() {
        Some(ca) => {
            for cert in rustls_pemfile::certs(&mut ca.as_bytes()) {
                let cert = cert.map_err(|e| ConfigError::Tls(format!("bad CA bundle: {}", e)))?;
                roots
                    .add(cert)
                    .map_err(|e| ConfigError::Tls(format!("bad CA certificate: {}", e)))?;
            }
        }
        None => {
            let native = rustls_native_certs::load_native_certs();
            let (added, _ignored) = roots.add_parsable_certificates(native.certs);
            if added == 0 {
                let detail = native
                    .errors
                    .first()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no certificates found".to_string());
                return Err(ConfigError::Tls(format!(
                    "could not load native roots: {}",
                    detail
                )));
            }
        }
    }

    Ok(roots)
}

/// Parses the configured client certificate chain and private key.
pub(crate) fn client_pair(
    tls: &TlsOptions,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ConfigError> {
    let cert_pem = tls
        .cert
        .as_deref()
        .ok_or_else(|| ConfigError::Tls("missing client certificate".to_string()))?;
    let key_pem = tls
        .key
        .as_deref()
        .ok_or_else(|| ConfigError::Tls("missing client key".to_string()))?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("bad client certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(
            "no certificates found in client certificate PEM".to_string(),
        ));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| ConfigError::Tls(format!("bad client key: {}", e)))?
        .ok_or_else(|| ConfigError::Tls("no private key found in client key PEM".to_string()))?;

    Ok((certs, key))
}

/// Certificate verifier that accepts everything; installed for skip-verify
/// runs only.
#[derive(Debug)]
struct NoVerification(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for NoVerification {
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
        verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}
