use crate::certs::acme::{AcmeClient, Issued};
use crate::certs::storage::{CertificateBundle, CertificateStorage};
use crate::config::Config;
use crate::error::Error;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Certificates with at most this much validity left are renewed.
pub const RENEW_BEFORE: time::Duration = time::Duration::days(30);

#[must_use]
pub fn needs_renewal(not_after: OffsetDateTime, now: OffsetDateTime) -> bool {
    not_after - now <= RENEW_BEFORE
}

/// A set of domains covered by one certificate, stored under its own group directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedGroup {
    pub name: &'static str,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    NoCertificate,
    Issued(CertificateBundle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub startup_delay: Duration,
    pub interval: Duration,
    pub backoff: Duration,
}

impl Schedule {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            startup_delay: config.startup_delay,
            interval: config.renewal_interval,
            backoff: config.retry_backoff,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failed cycles.
    #[must_use]
    pub fn retry_after(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.backoff.saturating_mul(factor).min(self.interval)
    }
}

pub struct CertificateManager<C> {
    client: C,
    storage: CertificateStorage,
    ca: String,
    groups: Vec<(ManagedGroup, GroupState)>,
}

impl<C: AcmeClient> CertificateManager<C> {
    pub fn new(client: C, storage: CertificateStorage, ca: &str, groups: Vec<ManagedGroup>) -> Self {
        Self {
            client,
            storage,
            ca: ca.to_string(),
            groups: groups
                .into_iter()
                .map(|group| (group, GroupState::NoCertificate))
                .collect(),
        }
    }

    #[must_use]
    pub fn state(&self, group: &str) -> Option<&GroupState> {
        self.groups
            .iter()
            .find(|(g, _)| g.name == group)
            .map(|(_, state)| state)
    }

    /// Pick up the bundles persisted by a previous run, refreshing each chain from the CA. A
    /// group whose bundle can't be loaded or refreshed starts without a certificate.
    pub async fn restore(&mut self) {
        for (group, state) in &mut self.groups {
            *state = match restore_group(&self.client, &self.storage, group).await {
                Ok(Some(bundle)) => {
                    info!(group = group.name, not_after = %bundle.not_after, "restored certificate");
                    GroupState::Issued(bundle)
                }
                Ok(None) => GroupState::NoCertificate,
                Err(err) => {
                    warn!(group = group.name, ?err, "can't restore certificate, a new one will be requested");
                    GroupState::NoCertificate
                }
            };
        }
    }

    /// Run one evaluation cycle as of `now`: obtain a certificate for every group without one,
    /// and renew those close to expiry. A failing group doesn't stop the others; the first
    /// failure is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error an obtain or renew call or the persistence of its result failed
    /// with.
    pub async fn evaluate_at(&mut self, now: OffsetDateTime) -> Result<(), Error> {
        let mut first_error = None;
        for (group, state) in &mut self.groups {
            let (operation, result) = match state {
                GroupState::NoCertificate => {
                    info!(group = group.name, domains = ?group.domains, "obtaining certificate");
                    ("obtain", self.client.obtain(&group.domains).await)
                }
                GroupState::Issued(bundle) if needs_renewal(bundle.not_after, now) => {
                    info!(group = group.name, not_after = %bundle.not_after, "renewing certificate");
                    ("renew", self.client.renew(bundle).await)
                }
                GroupState::Issued(_) => continue,
            };

            match persist(&self.storage, group, result).await {
                Ok(bundle) => {
                    info!(group = group.name, operation, not_after = %bundle.not_after, "certificate saved");
                    *state = GroupState::Issued(bundle);
                }
                Err(err) => {
                    error!(group = group.name, operation, ca = %self.ca, ?err, "certificate cycle failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// # Errors
    ///
    /// See [`CertificateManager::evaluate_at`].
    pub async fn evaluate(&mut self) -> Result<(), Error> {
        self.evaluate_at(OffsetDateTime::now_utc()).await
    }

    /// Evaluate on `schedule` for as long as the task lives. Recoverable failures are retried
    /// with backoff.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error.
    pub async fn run(mut self, schedule: Schedule) -> Result<(), Error> {
        tokio::time::sleep(schedule.startup_delay).await;
        let mut failures = 0;
        loop {
            let delay = match self.evaluate().await {
                Ok(()) => {
                    failures = 0;
                    schedule.interval
                }
                Err(err) if !err.is_recoverable() => return Err(err),
                Err(_) => {
                    failures += 1;
                    let delay = schedule.retry_after(failures);
                    warn!(failures, ?delay, "retrying certificate cycle");
                    delay
                }
            };
            tokio::time::sleep(delay).await;
        }
    }
}

async fn restore_group<C: AcmeClient>(
    client: &C,
    storage: &CertificateStorage,
    group: &ManagedGroup,
) -> Result<Option<CertificateBundle>, Error> {
    let Some(mut bundle) = storage.load(group.name).await? else {
        return Ok(None);
    };
    let certificate = client.fetch(&bundle.cert_url).await?;
    if certificate != bundle.certificate {
        bundle = CertificateBundle::new(
            group.name,
            &bundle.domains,
            bundle.cert_url,
            certificate,
            bundle.private_key,
        )?;
        storage.save(&bundle).await?;
    }
    Ok(Some(bundle))
}

async fn persist(
    storage: &CertificateStorage,
    group: &ManagedGroup,
    issued: Result<Issued, Error>,
) -> Result<CertificateBundle, Error> {
    let issued = issued?;
    let bundle = CertificateBundle::new(
        group.name,
        &group.domains,
        issued.url,
        issued.certificate,
        issued.private_key,
    )?;
    storage.save(&bundle).await?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certs::storage::tests::self_signed;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        obtain: AtomicUsize,
        renew: AtomicUsize,
        fetch: AtomicUsize,
    }

    /// Issues self-signed certificates valid for `days`.
    #[derive(Clone)]
    struct FakeClient {
        calls: Arc<Calls>,
        days: Arc<AtomicI64>,
        served: Arc<Mutex<HashMap<String, String>>>,
        fail_fetch: bool,
    }

    impl FakeClient {
        fn new(days: i64) -> Self {
            Self {
                calls: Arc::default(),
                days: Arc::new(AtomicI64::new(days)),
                served: Arc::default(),
                fail_fetch: false,
            }
        }

        fn issue(&self, domains: &[String]) -> Issued {
            let (certificate, private_key) = self_signed(domains, self.days.load(Ordering::SeqCst));
            let url = format!("https://ca.test/order/{}", domains[0]);
            self.served
                .lock()
                .unwrap()
                .insert(url.clone(), certificate.clone());
            Issued {
                certificate,
                private_key,
                url,
            }
        }
    }

    #[async_trait::async_trait]
    impl AcmeClient for FakeClient {
        async fn obtain(&self, domains: &[String]) -> Result<Issued, Error> {
            self.calls.obtain.fetch_add(1, Ordering::SeqCst);
            Ok(self.issue(domains))
        }

        async fn renew(&self, previous: &CertificateBundle) -> Result<Issued, Error> {
            self.calls.renew.fetch_add(1, Ordering::SeqCst);
            Ok(self.issue(&previous.domains))
        }

        async fn fetch(&self, url: &str) -> Result<String, Error> {
            self.calls.fetch.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(Error::OrderFailed {
                    url: url.to_string(),
                    status: "gone".to_string(),
                });
            }
            Ok(self.served.lock().unwrap()[url].clone())
        }
    }

    fn groups() -> Vec<ManagedGroup> {
        vec![
            ManagedGroup {
                name: "wildcard",
                domains: vec!["*.local-ip.test".to_string()],
            },
            ManagedGroup {
                name: "root",
                domains: vec!["local-ip.test".to_string()],
            },
        ]
    }

    #[test]
    fn test_needs_renewal() {
        let now = OffsetDateTime::now_utc();
        assert!(!needs_renewal(now + time::Duration::days(31), now));
        assert!(needs_renewal(now + time::Duration::days(30), now));
        assert!(needs_renewal(now + time::Duration::days(2), now));
        assert!(needs_renewal(now - time::Duration::days(2), now));
    }

    #[test]
    fn test_retry_after() {
        let schedule = Schedule {
            startup_delay: Duration::ZERO,
            interval: Duration::from_secs(3600),
            backoff: Duration::from_secs(300),
        };
        assert_eq!(schedule.retry_after(1), Duration::from_secs(300));
        assert_eq!(schedule.retry_after(2), Duration::from_secs(600));
        assert_eq!(schedule.retry_after(3), Duration::from_secs(1200));
        assert_eq!(schedule.retry_after(5), Duration::from_secs(3600));
        assert_eq!(schedule.retry_after(100), Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_no_renewal_while_valid() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient::new(90);
        let mut manager = CertificateManager::new(
            client.clone(),
            CertificateStorage::new(dir.path()),
            "https://ca.test/dir",
            groups(),
        );

        manager.evaluate().await.unwrap();
        assert_eq!(client.calls.obtain.load(Ordering::SeqCst), 2);
        for _ in 0..5 {
            manager.evaluate().await.unwrap();
        }
        assert_eq!(client.calls.obtain.load(Ordering::SeqCst), 2);
        assert_eq!(client.calls.renew.load(Ordering::SeqCst), 0);
        assert!(matches!(manager.state("root"), Some(GroupState::Issued(_))));
        assert!(dir.path().join("certs/wildcard/server.key").exists());
    }

    #[tokio::test]
    async fn test_one_renewal_per_evaluation() {
        let dir = tempfile::tempdir().unwrap();
        // Every certificate, renewed ones included, is already within the renewal window.
        let client = FakeClient::new(10);
        let mut manager = CertificateManager::new(
            client.clone(),
            CertificateStorage::new(dir.path()),
            "https://ca.test/dir",
            groups(),
        );

        manager.evaluate().await.unwrap();
        for evaluation in 1..=3 {
            manager.evaluate().await.unwrap();
            assert_eq!(client.calls.renew.load(Ordering::SeqCst), 2 * evaluation);
        }
        assert_eq!(client.calls.obtain.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_renewal_restarts_the_clock() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient::new(10);
        let mut manager = CertificateManager::new(
            client.clone(),
            CertificateStorage::new(dir.path()),
            "https://ca.test/dir",
            groups(),
        );

        manager.evaluate().await.unwrap();
        client.days.store(90, Ordering::SeqCst);
        manager.evaluate().await.unwrap();
        manager.evaluate().await.unwrap();
        assert_eq!(client.calls.renew.load(Ordering::SeqCst), 2);

        // 70 days later the renewed certificates are due again.
        let later = OffsetDateTime::now_utc() + time::Duration::days(70);
        manager.evaluate_at(later).await.unwrap();
        assert_eq!(client.calls.renew.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_restore() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertificateStorage::new(dir.path());
        let client = FakeClient::new(90);
        let mut first = CertificateManager::new(client.clone(), storage.clone(), "ca", groups());
        first.evaluate().await.unwrap();

        let mut restarted = CertificateManager::new(client.clone(), storage, "ca", groups());
        restarted.restore().await;
        assert_eq!(restarted.state("root"), first.state("root"));
        restarted.evaluate().await.unwrap();
        assert_eq!(client.calls.obtain.load(Ordering::SeqCst), 2);
        assert_eq!(client.calls.renew.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_obtain() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertificateStorage::new(dir.path());
        let mut client = FakeClient::new(90);
        let mut first = CertificateManager::new(client.clone(), storage.clone(), "ca", groups());
        first.evaluate().await.unwrap();

        client.fail_fetch = true;
        let mut restarted = CertificateManager::new(client.clone(), storage, "ca", groups());
        restarted.restore().await;
        assert_eq!(client.calls.fetch.load(Ordering::SeqCst), 2);
        assert_eq!(restarted.state("root"), Some(&GroupState::NoCertificate));

        restarted.evaluate().await.unwrap();
        assert_eq!(client.calls.obtain.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_restore_without_bundles() {
        let dir = tempfile::tempdir().unwrap();
        let client = FakeClient::new(90);
        let mut manager =
            CertificateManager::new(client.clone(), CertificateStorage::new(dir.path()), "ca", groups());
        manager.restore().await;
        assert_eq!(client.calls.fetch.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state("wildcard"), Some(&GroupState::NoCertificate));
    }
}
