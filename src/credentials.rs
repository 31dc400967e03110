//! Credential material loading
//!
//! Reads the client certificate, private key and CA bundle from disk as
//! opaque bytes. Parsing happens in [`crate::transport::tls`].

use crate::config::TlsSection;
use crate::error::TailError;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// PEM bytes for one client identity and its trust anchors
pub struct CredentialMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Zeroizing<Vec<u8>>,
    pub ca_pem: Vec<u8>,
}

impl CredentialMaterial {
    pub fn load(tls: &TlsSection) -> Result<Self, TailError> {
        let cert_file = tls
            .cert_file
            .as_deref()
            .ok_or_else(|| TailError::credential("cert_file", "no client certificate configured"))?;
        let key_file = tls
            .key_file
            .as_deref()
            .ok_or_else(|| TailError::credential("key_file", "no private key configured"))?;

        info!(
            cert_file = %cert_file.display(),
            key_file = %key_file.display(),
            "Loading client certificate and key"
        );
        let cert_pem = read_file("cert_file", cert_file)?;
        let key_pem = Zeroizing::new(read_file("key_file", key_file)?);

        info!(ca_file = %tls.ca_file.display(), "Loading CA bundle");
        let ca_pem = read_file("ca_file", &tls.ca_file)?;

        debug!(
            cert_bytes = cert_pem.len(),
            ca_bytes = ca_pem.len(),
            "Credential material loaded"
        );
        Ok(Self {
            cert_pem,
            key_pem,
            ca_pem,
        })
    }
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .field("ca_pem", &format_args!("{} bytes", self.ca_pem.len()))
            .finish()
    }
}

fn read_file(what: &str, path: &Path) -> Result<Vec<u8>, TailError> {
    let bytes = std::fs::read(path)
        .map_err(|e| TailError::credential(format!("{what} {}", path.display()), e))?;
    if bytes.is_empty() {
        return Err(TailError::credential(
            format!("{what} {}", path.display()),
            "file is empty",
        ));
    }
    Ok(bytes)
}
