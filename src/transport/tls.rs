//! Mutually-authenticated TLS client built on rustls

use super::{Endpoint, Transport};
use crate::credentials::CredentialMaterial;
use crate::error::TailError;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Established encrypted byte stream to the broker
pub type SecureStream = TlsStream<TcpStream>;

/// Client certificate chain and private key
pub struct Identity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Identity {
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TailError> {
        let chain = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TailError::credential("client certificate", e))?;
        if chain.is_empty() {
            return Err(TailError::credential(
                "client certificate",
                "no PEM certificates found",
            ));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| TailError::credential("private key", e))?;
        Ok(Self { chain, key })
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("chain_len", &self.chain.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Trusted authorities for validating the broker certificate
#[derive(Debug)]
pub struct TrustStore {
    roots: RootCertStore,
}

impl TrustStore {
    /// Parse a PEM bundle. Unparsable entries are skipped, as system bundles
    /// routinely carry a few; a bundle with no usable entry is an error.
    pub fn from_pem(ca_pem: &[u8]) -> Result<Self, TailError> {
        let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(ca_pem)
            .filter_map(Result::ok)
            .collect();
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if ignored > 0 {
            warn!(ignored, "Skipped unparsable certificates in CA bundle");
        }
        if added == 0 {
            return Err(TailError::credential(
                "CA bundle",
                "no usable trusted certificates found",
            ));
        }
        debug!(trusted = added, "Trust store built");
        Ok(Self { roots })
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

/// Dial and handshake limits plus the name the broker certificate is checked against
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub dial_timeout: Duration,
    pub tls_timeout: Duration,
    /// Overrides the endpoint host for SNI and certificate verification
    pub server_name: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            tls_timeout: Duration::from_secs(10),
            server_name: None,
        }
    }
}

/// Opens TLS connections presenting one client identity
#[derive(Clone)]
pub struct SecureTransport {
    connector: TlsConnector,
    options: TransportOptions,
}

impl SecureTransport {
    pub fn new(
        identity: Identity,
        trust: TrustStore,
        options: TransportOptions,
    ) -> Result<Self, TailError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TailError::credential("TLS configuration", e))?
            .with_root_certificates(trust.roots)
            .with_client_auth_cert(identity.chain, identity.key)
            .map_err(|e| TailError::credential("client identity", e))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            options,
        })
    }

    /// Parse loaded PEM material and build the transport
    pub fn from_material(
        material: &CredentialMaterial,
        options: TransportOptions,
    ) -> Result<Self, TailError> {
        let identity = Identity::from_pem(&material.cert_pem, &material.key_pem)?;
        let trust = TrustStore::from_pem(&material.ca_pem)?;
        Self::new(identity, trust, options)
    }

    pub async fn establish(&self, endpoint: &Endpoint) -> Result<SecureStream, TailError> {
        let target = endpoint.to_string();
        let name = self
            .options
            .server_name
            .clone()
            .unwrap_or_else(|| endpoint.host().to_string());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|e| TailError::trust(target.clone(), format!("invalid server name {name:?}: {e}")))?;

        debug!(endpoint = %target, "Dialing broker");
        let tcp = match timeout(
            self.options.dial_timeout,
            TcpStream::connect(endpoint.socket_addr()),
        )
        .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(source)) => {
                return Err(TailError::Dial {
                    endpoint: target,
                    source,
                });
            }
            Err(_) => {
                return Err(TailError::Dial {
                    endpoint: target,
                    source: io::Error::new(io::ErrorKind::TimedOut, "TCP connect timed out"),
                });
            }
        };
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(endpoint = %target, server_name = %name, "Starting TLS handshake");
        let stream = match timeout(
            self.options.tls_timeout,
            self.connector.connect(server_name, tcp),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(classify_tls_error(target, e)),
            Err(_) => {
                return Err(TailError::Dial {
                    endpoint: target,
                    source: io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
                });
            }
        };

        let (_, connection) = stream.get_ref();
        info!(
            endpoint = %target,
            protocol = ?connection.protocol_version(),
            cipher_suite = ?connection.negotiated_cipher_suite().map(|s| s.suite()),
            "Secure transport established"
        );
        Ok(stream)
    }
}

#[async_trait::async_trait]
impl Transport for SecureTransport {
    type Stream = SecureStream;

    async fn establish(&self, endpoint: &Endpoint) -> Result<Self::Stream, TailError> {
        SecureTransport::establish(self, endpoint).await
    }
}

/// TLS-layer failures (bad certificate, alert from the broker) are trust
/// failures; anything else happened on the socket.
fn classify_tls_error(endpoint: String, error: io::Error) -> TailError {
    let tls_error = error
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>());
    match tls_error {
        Some(tls_error) => TailError::trust(endpoint, tls_error),
        None => TailError::Dial {
            endpoint,
            source: error,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_rejects_non_pem() {
        assert!(matches!(
            Identity::from_pem(b"not a certificate", b"not a key"),
            Err(TailError::Credential { .. })
        ));
    }

    #[test]
    fn test_trust_store_requires_a_certificate() {
        assert!(matches!(
            TrustStore::from_pem(b"# empty bundle\n"),
            Err(TailError::Credential { .. })
        ));
    }

    #[test]
    fn test_classify_tls_error() {
        let err = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::InvalidCertificate(rustls::CertificateError::UnknownIssuer),
        );
        assert!(matches!(
            classify_tls_error("b:1".into(), err),
            TailError::Trust { .. }
        ));

        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(
            classify_tls_error("b:1".into(), err),
            TailError::Dial { .. }
        ));
    }
}
