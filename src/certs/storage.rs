//! On-disk layout of accounts and certificates.
//!
//! ```text
//! <root>/accounts/<ca-host>/<email>/account.json
//! <root>/accounts/<ca-host>/<email>/keys/<email>.key
//! <root>/certs/<group>/server.pem
//! <root>/certs/<group>/server.key
//! <root>/certs/<group>/output.json
//! ```

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use x509_parser::pem::parse_x509_pem;

pub const CERT_FILE: &str = "server.pem";
pub const KEY_FILE: &str = "server.key";
pub const METADATA_FILE: &str = "output.json";

const PUBLIC_MODE: u32 = 0o644;
const PRIVATE_MODE: u32 = 0o600;

/// A certificate chain and its private key, as issued for one group of domains.
///
/// Serialized as a group's `output.json`; the private key is kept out of it and lives only in
/// `server.key`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub group: String,
    pub domains: Vec<String>,
    /// Where the CA serves this certificate, used to fetch it again.
    pub cert_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    pub certificate: String,
    #[serde(skip)]
    pub private_key: String,
}

impl CertificateBundle {
    /// Assemble a bundle, reading the expiry from the leaf (first) certificate of the chain.
    pub fn new(
        group: &str,
        domains: &[String],
        cert_url: String,
        certificate: String,
        private_key: String,
    ) -> Result<Self, Error> {
        let not_after = not_after(&certificate)?;
        Ok(Self {
            group: group.to_string(),
            domains: domains.to_vec(),
            cert_url,
            not_after,
            certificate,
            private_key,
        })
    }
}

/// Expiry of the first certificate in a PEM chain.
pub fn not_after(chain: &str) -> Result<OffsetDateTime, Error> {
    let (_, pem) = parse_x509_pem(chain.as_bytes())
        .map_err(|err| Error::InvalidCertificate(format!("bad PEM: {err}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|err| Error::InvalidCertificate(format!("bad X.509: {err}")))?;
    Ok(cert.validity().not_after.to_datetime())
}

#[derive(Debug, Clone)]
pub struct CertificateStorage {
    root: PathBuf,
}

impl CertificateStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn account_dir(&self, ca_host: &str, email: &str) -> PathBuf {
        self.root.join("accounts").join(ca_host).join(email)
    }

    #[must_use]
    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.root.join("certs").join(group)
    }

    #[must_use]
    pub fn certificate_path(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(CERT_FILE)
    }

    #[must_use]
    pub fn key_path(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(KEY_FILE)
    }

    #[must_use]
    pub fn metadata_path(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(METADATA_FILE)
    }

    /// Persist `bundle` as its group's three artifacts.
    ///
    /// All three are first written next to their destination, then renamed into place; a failure
    /// while writing leaves the previous artifacts untouched. `server.pem` is renamed before
    /// `server.key`, as key modification is what triggers a TLS reload, and `output.json` goes
    /// last.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] if the group directory can't be created or an artifact can't be
    /// written, and [`Error::InvalidJSON`] if the metadata can't be serialized.
    pub async fn save(&self, bundle: &CertificateBundle) -> Result<(), Error> {
        let dir = self.group_dir(&bundle.group);
        fs::create_dir_all(&dir).await?;

        let metadata = serde_json::to_vec_pretty(bundle)?;
        let staged = [
            (self.certificate_path(&bundle.group), bundle.certificate.as_bytes(), PUBLIC_MODE),
            (self.key_path(&bundle.group), bundle.private_key.as_bytes(), PRIVATE_MODE),
            (self.metadata_path(&bundle.group), metadata.as_slice(), PUBLIC_MODE),
        ];

        for (path, contents, mode) in &staged {
            if let Err(err) = write_file(&staging_path(path), contents, *mode).await {
                for (path, _, _) in &staged {
                    let _ = fs::remove_file(staging_path(path)).await;
                }
                return Err(err.into());
            }
        }
        for (path, _, _) in &staged {
            fs::rename(staging_path(path), path).await?;
        }
        Ok(())
    }

    /// Load the last bundle persisted for `group`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IO`] or [`Error::InvalidJSON`] if artifacts exist but can't be read.
    pub async fn load(&self, group: &str) -> Result<Option<CertificateBundle>, Error> {
        let metadata = match fs::read(self.metadata_path(group)).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut bundle: CertificateBundle = serde_json::from_slice(&metadata)?;
        bundle.private_key = fs::read_to_string(self.key_path(group)).await?;
        Ok(Some(bundle))
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Replace `path` with `contents` by writing a sibling file and renaming it over `path`.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<(), Error> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let mode = if private { PRIVATE_MODE } else { PUBLIC_MODE };
    let staged = staging_path(path);
    write_file(&staged, contents, mode).await?;
    fs::rename(&staged, path).await?;
    Ok(())
}

#[cfg_attr(not(unix), allow(unused_variables))]
async fn write_file(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);
    let mut f = options.open(path).await?;
    f.write_all(contents).await?;
    f.sync_all().await?;
    Ok(())
}
