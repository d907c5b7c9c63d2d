//! TLS material for etcd client connections.
//!
//! k3s etcd requires mutual TLS: the server certificate is signed by the
//! etcd server CA and clients present a certificate signed by the etcd
//! client CA. Material is loaded as PEM and checked up front so a bad
//! file fails at startup rather than on the first dial.

use std::path::Path;

use etcd_client::{Certificate, Identity, TlsOptions};
use thiserror::Error;

/// Errors loading TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid PEM in {what}: {source}")]
    Pem {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificate found in {0}")]
    NoCertificate(&'static str),

    #[error("no private key found in client key")]
    NoPrivateKey,
}

/// PEM-encoded CA bundle and client identity.
#[derive(Clone)]
pub struct TlsMaterial {
    ca_pem: Vec<u8>,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    server_name: Option<String>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl TlsMaterial {
    /// Build from in-memory PEM data.
    pub fn from_pem(
        ca_pem: impl Into<Vec<u8>>,
        cert_pem: impl Into<Vec<u8>>,
        key_pem: impl Into<Vec<u8>>,
    ) -> Result<Self, TlsError> {
        let material = Self {
            ca_pem: ca_pem.into(),
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            server_name: None,
        };

        count_certs(&material.ca_pem, "CA bundle")?;
        count_certs(&material.cert_pem, "client certificate")?;
        let key = rustls_pemfile::private_key(&mut material.key_pem.as_slice())
            .map_err(|source| TlsError::Pem {
                what: "client key",
                source,
            })?;
        if key.is_none() {
            return Err(TlsError::NoPrivateKey);
        }

        Ok(material)
    }

    /// Load PEM files from disk.
    pub fn from_files(ca: &Path, cert: &Path, key: &Path) -> Result<Self, TlsError> {
        Self::from_pem(read(ca)?, read(cert)?, read(key)?)
    }

    /// Override the name checked against the server certificate.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    /// Convert into etcd client TLS options.
    pub fn to_tls_options(&self) -> TlsOptions {
        let mut options = TlsOptions::new()
            .ca_certificate(Certificate::from_pem(&self.ca_pem))
            .identity(Identity::from_pem(&self.cert_pem, &self.key_pem));
        if let Some(name) = &self.server_name {
            options = options.domain_name(name.clone());
        }
        options
    }
}

fn read(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.display().to_string(),
        source,
    })
}

fn count_certs(pem: &[u8], what: &'static str) -> Result<usize, TlsError> {
    let mut count = 0;
    for cert in rustls_pemfile::certs(&mut &pem[..]) {
        cert.map_err(|source| TlsError::Pem { what, source })?;
        count += 1;
    }
    if count == 0 {
        return Err(TlsError::NoCertificate(what));
    }
    Ok(count)
}
