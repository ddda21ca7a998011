use crate::error::Error;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio_rustls::rustls::crypto::ring::sign::any_supported_type;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::CertifiedKey;

/// Serves the certificate/key pair found on disk, reparsing it whenever the key file's
/// modification time moves. Renewals are picked up by the next handshake without a restart.
#[derive(Debug)]
pub struct CertificateReloader {
    cert_path: PathBuf,
    key_path: PathBuf,
    cache: RwLock<Option<(Arc<CertifiedKey>, SystemTime)>>,
}

impl CertificateReloader {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            cache: RwLock::new(None),
        }
    }

    /// The current pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] if the key file can't be inspected and [`Error::Tls`] if the files
    /// don't hold a usable pair.
    pub fn get_certificate(&self) -> Result<Arc<CertifiedKey>, Error> {
        let modified = fs::metadata(&self.key_path)?.modified()?;

        if let Some(certified) = cached(&self.cache.read(), modified) {
            return Ok(certified);
        }

        let mut cache = self.cache.write();
        // Another handshake may have reloaded while we waited for the lock.
        if let Some(certified) = cached(&cache, modified) {
            return Ok(certified);
        }
        let certified = Arc::new(load(&self.cert_path, &self.key_path)?);
        tracing::info!(path = %self.cert_path.display(), "loaded TLS certificate");
        *cache = Some((certified.clone(), modified));
        Ok(certified)
    }
}

fn cached(
    cache: &Option<(Arc<CertifiedKey>, SystemTime)>,
    modified: SystemTime,
) -> Option<Arc<CertifiedKey>> {
    match cache {
        Some((certified, loaded)) if modified <= *loaded => Some(certified.clone()),
        _ => None,
    }
}

fn load(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, Error> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|err| Error::Tls(format!("{}: {err}", cert_path.display())))?;
    if certs.is_empty() {
        return Err(Error::Tls(format!("{}: no certificate", cert_path.display())));
    }

    let mut reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut reader)
        .map_err(|err| Error::Tls(format!("{}: {err}", key_path.display())))?
        .ok_or_else(|| Error::Tls(format!("{}: no private key", key_path.display())))?;
    let key = any_supported_type(&key)
        .map_err(|err| Error::Tls(format!("{}: {err}", key_path.display())))?;

    Ok(CertifiedKey::new(certs, key))
}

impl ResolvesServerCert for CertificateReloader {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.get_certificate() {
            Ok(certified) => Some(certified),
            Err(err) => {
                tracing::error!(?err, "can't load TLS certificate");
                None
            }
        }
    }
}
