//! TLS client setup for encrypted bouncer listeners.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use common::config::TlsConfig;
use common::{Result, SweepError};

/// Build the rustls client configuration.
///
/// With `verify` unset the server certificate is accepted as-is; handshake
/// signatures are still checked so the session keys are sound.
pub fn client_config(tls: &TlsConfig) -> Result<ClientConfig> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| SweepError::Configuration(format!("Unsupported TLS setup: {e}")))?;

    let config = if tls.verify {
        let ca_file = tls.ca_file.as_deref().ok_or_else(|| {
            SweepError::Configuration("TLS verification requires bouncer.tls.ca_file".to_string())
        })?;
        builder
            .with_root_certificates(load_roots(ca_file)?)
            .with_no_client_auth()
    } else {
        log::warn!("TLS certificate verification is disabled for the bouncer connection");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate { provider }))
            .with_no_client_auth()
    };

    Ok(config)
}

pub async fn connect(host: &str, tls: &TlsConfig, tcp: TcpStream) -> Result<TlsStream<TcpStream>> {
    let connector = TlsConnector::from(Arc::new(client_config(tls)?));
    let server_name = ServerName::try_from(host.to_owned()).map_err(|e| {
        SweepError::Configuration(format!("Invalid TLS server name '{host}': {e}"))
    })?;

    connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| SweepError::connection("TLS handshake with bouncer failed", e))
}

fn load_roots(path: &Path) -> Result<RootCertStore> {
    let file = File::open(path).map_err(|e| {
        SweepError::Configuration(format!("Failed to open CA file {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| {
            SweepError::Configuration(format!("Failed to parse CA file {}: {e}", path.display()))
        })?;
        roots.add(cert).map_err(|e| {
            SweepError::Configuration(format!(
                "Invalid certificate in {}: {e}",
                path.display()
            ))
        })?;
    }

    if roots.is_empty() {
        return Err(SweepError::Configuration(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

#[derive(Debug)]
struct AcceptAnyCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_unverified_config_builds() {
        let tls = TlsConfig {
            enabled: true,
            verify: false,
            ca_file: None,
        };
        assert!(client_config(&tls).is_ok());
    }

    #[test]
    fn test_verification_without_ca_file_is_rejected() {
        let tls = TlsConfig {
            enabled: true,
            verify: true,
            ca_file: None,
        };
        let err = client_config(&tls).unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)));
    }

    #[test]
    fn test_ca_file_without_certificates_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let ca = dir.path().join("empty.pem");
        std::fs::write(&ca, "not a certificate\n").unwrap();

        let tls = TlsConfig {
            enabled: true,
            verify: true,
            ca_file: Some(ca),
        };
        let err = client_config(&tls).unwrap_err();
        assert!(matches!(err, SweepError::Configuration(_)), "{err:?}");
    }

    #[test]
    fn test_missing_ca_file_is_rejected() {
        let tls = TlsConfig {
            enabled: true,
            verify: true,
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
        };
        assert!(client_config(&tls).is_err());
    }
}
