//! TLS server setup for the client listener.
//!
//! Loads a PEM certificate chain and private key from disk and builds a
//! `tokio-rustls` acceptor on the `ring` crypto provider.  No client
//! certificates are requested; the client proves itself with the
//! `USERNAME` / `PASSWORD` exchange instead.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::infrastructure::config_file::ConfigError;

/// Builds the acceptor from `cert_path` and `key_path`.
///
/// # Errors
///
/// [`ConfigError::Tls`] if either file cannot be read or parsed, the chain is
/// empty, or the key does not fit the certificate.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ConfigError> {
    let certs = load_certificates(cert_path)?;
    let key = load_private_key(key_path)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .and_then(|builder| builder.with_no_client_auth().with_single_cert(certs, key))
        .map_err(|e| tls_error(cert_path, format!("server config error: {e}")))?;

    debug!(
        "TLS acceptor ready (cert {}, key {})",
        cert_path.display(),
        key_path.display()
    );
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = read(path)?;
    let certs = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(path, format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(tls_error(path, "no certificates found".into()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = read(path)?;
    PrivateKeyDer::from_pem_slice(&pem)
        .map_err(|e| tls_error(path, format!("failed to parse private key: {e}")))
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| tls_error(path, e.to_string()))
}

fn tls_error(path: &Path, reason: String) -> ConfigError {
    ConfigError::Tls {
        path: path.to_path_buf(),
        reason,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
