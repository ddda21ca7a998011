//! Certificates for the zone, issued through ACME with DNS-01 challenges.
//!
//! # Groups
//!
//! Two certificates are managed, each with its own order and directory under
//! [`Config::storage_root`][`crate::config::Config::storage_root`]:
//!
//! * `wildcard` covers `*.<domain>`, so that any wildcard IP hostname can be served over TLS.
//!   Its files are published over HTTP, see [`crate::http`].
//! * `root` covers `<domain>` and is the certificate of wildip's own HTTPS listener.
//!
//! Both orders validate at `_acme-challenge.<domain>`, the one name the
//! [`RecordStore`][crate::record_store::RecordStore] accepts writes for. Orders run one after the
//! other, so the single challenge slot is never contended.
//!
//! # Schedule
//!
//! After [`Config::startup_delay`][`crate::config::Config::startup_delay`], missing certificates
//! are obtained and those with 30 days or less of validity left are renewed. This is repeated
//! every [`Config::renewal_interval`][`crate::config::Config::renewal_interval`], or after a
//! doubling [`Config::retry_backoff`][`crate::config::Config::retry_backoff`] when a cycle fails.

pub mod account;
pub mod acme;
pub mod manager;
pub mod provider;
pub mod storage;

pub use account::{Account, AccountPaths};
pub use acme::{AcmeClient, InstantAcmeClient, Issued};
pub use manager::{CertificateManager, GroupState, ManagedGroup, Schedule};
pub use provider::{Dns01Provider, RecordStoreProvider};
pub use storage::{CertificateBundle, CertificateStorage};

use crate::config::SharedConfig;
use crate::error::Error;
use crate::record_store::SharedRecordStore;
use crate::zone::Zone;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const WILDCARD_GROUP: &str = "wildcard";
pub const ROOT_GROUP: &str = "root";

/// The groups managed for `zone`.
#[must_use]
pub fn groups(zone: &Zone) -> Vec<ManagedGroup> {
    let domain = zone.apex().to_string();
    let domain = domain.trim_end_matches('.');
    vec![
        ManagedGroup {
            name: WILDCARD_GROUP,
            domains: vec![format!("*.{domain}")],
        },
        ManagedGroup {
            name: ROOT_GROUP,
            domains: vec![domain.to_string()],
        },
    ]
}

/// Keep the zone's certificates issued for as long as the task lives. The DNS server answering
/// from `store` must be running already: the CA validates challenges against it.
///
/// # Errors
///
/// Returns an unrecoverable error, such as a corrupt persisted account.
pub async fn run(config: SharedConfig, zone: Arc<Zone>, store: SharedRecordStore) -> Result<(), Error> {
    let ca = config.ca_directory().to_string();
    let schedule = Schedule::from_config(&config);
    let storage = CertificateStorage::new(&config.storage_root);
    let paths = AccountPaths::new(&storage, &ca, &config.email)?;

    tokio::time::sleep(schedule.startup_delay).await;
    let mut failures = 0;
    let account = loop {
        let result = tokio::time::timeout(config.acme_timeout, async {
            Account::load_or_register(&paths, &ca, &config.email)
                .await?
                .into_client(&ca)
                .await
        })
        .await
        .unwrap_or(Err(Error::Timeout {
            operation: "account",
            elapsed: config.acme_timeout,
        }));
        match result {
            Ok(account) => break account,
            Err(err) if !err.is_recoverable() => {
                error!(operation = "account", ca = %ca, ?err, "can't use ACME account");
                return Err(err);
            }
            Err(err) => {
                failures += 1;
                let delay = schedule.retry_after(failures);
                warn!(operation = "account", ca = %ca, ?err, ?delay, "ACME account unavailable, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    };
    info!(ca = %ca, email = %config.email, "using ACME account");

    let provider = Arc::new(RecordStoreProvider::new(store));
    let client = InstantAcmeClient::new(account, provider, config.acme_timeout);
    let mut manager = CertificateManager::new(client, storage, &ca, groups(&zone));
    manager.restore().await;
    manager
        .run(Schedule {
            startup_delay: std::time::Duration::ZERO,
            ..schedule
        })
        .await
}
