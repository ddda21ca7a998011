//! The certificate authority, as seen by the [`CertificateManager`][super::CertificateManager].

use crate::certs::provider::Dns01Provider;
use crate::certs::storage::CertificateBundle;
use crate::error::Error;
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewOrder, Order, OrderStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A freshly issued certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issued {
    /// PEM chain, leaf first.
    pub certificate: String,
    /// PEM private key the certificate was requested for.
    pub private_key: String,
    /// Where the CA serves the certificate.
    pub url: String,
}

#[async_trait::async_trait]
pub trait AcmeClient: Send + Sync {
    /// Run a complete order for `domains`: solve every DNS-01 challenge, submit a CSR for a new
    /// key and download the issued chain.
    async fn obtain(&self, domains: &[String]) -> Result<Issued, Error>;

    /// Replace `previous` with a certificate for the same domains.
    async fn renew(&self, previous: &CertificateBundle) -> Result<Issued, Error> {
        self.obtain(&previous.domains).await
    }

    /// Download the chain the CA serves at `url`.
    async fn fetch(&self, url: &str) -> Result<String, Error>;
}

/// [`AcmeClient`] speaking RFC 8555 through `instant-acme`, solving challenges with a
/// [`Dns01Provider`].
pub struct InstantAcmeClient {
    account: Account,
    provider: Arc<dyn Dns01Provider>,
    timeout: Duration,
}

impl InstantAcmeClient {
    pub fn new(account: Account, provider: Arc<dyn Dns01Provider>, timeout: Duration) -> Self {
        Self {
            account,
            provider,
            timeout,
        }
    }

    /// Orders run stage by stage, each under the timeout. Challenges are withdrawn between the
    /// stages, outside any timeout, so an order that stalls still leaves no record behind.
    async fn run_order(&self, operation: &'static str, domains: &[String]) -> Result<Issued, Error> {
        let identifiers: Vec<Identifier> =
            domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = within(self.timeout, operation, async {
            Ok(self.account.new_order(&NewOrder::new(&identifiers)).await?)
        })
        .await?;
        let url = order.url().to_string();
        info!(?domains, order = %url, "created certificate order");

        let mut challenges = Challenges::new(self.provider.clone());
        let solved = within(
            self.timeout,
            operation,
            solve_challenges(&mut order, &mut challenges),
        )
        .await;
        challenges.clean_up().await;
        solved?;

        let key = rcgen::KeyPair::generate()?;
        let csr = rcgen::CertificateParams::new(domains.to_vec())?.serialize_request(&key)?;
        let certificate = within(self.timeout, operation, async {
            order.finalize_csr(&csr.der().to_vec()).await?;
            wait_for(&mut order, &url, OrderStatus::Valid).await?;
            order.certificate().await?.ok_or_else(|| Error::OrderFailed {
                url: url.clone(),
                status: "valid without a certificate".to_string(),
            })
        })
        .await?;
        info!(?domains, order = %url, "certificate issued");

        Ok(Issued {
            certificate,
            private_key: key.serialize_pem(),
            url,
        })
    }
}

async fn within<T>(
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| Error::Timeout {
            operation,
            elapsed: timeout,
        })?
}

/// The challenge records published for one order. An entry is recorded before the provider is
/// asked to publish it, so a half-finished `present` is cleaned up too.
struct Challenges {
    provider: Arc<dyn Dns01Provider>,
    presented: Vec<(String, String, String)>,
}

impl Challenges {
    fn new(provider: Arc<dyn Dns01Provider>) -> Self {
        Self {
            provider,
            presented: Vec::new(),
        }
    }

    async fn present(&mut self, domain: &str, token: &str, key_authorization: &str) -> Result<(), Error> {
        self.presented.push((
            domain.to_string(),
            token.to_string(),
            key_authorization.to_string(),
        ));
        self.provider.present(domain, token, key_authorization).await
    }

    /// Withdraw every record, whatever the outcome of the order.
    async fn clean_up(self) {
        for (domain, token, key_authorization) in &self.presented {
            if let Err(err) = self
                .provider
                .clean_up(domain, token, key_authorization)
                .await
            {
                tracing::warn!(domain = %domain, ?err, "DNS-01 challenge cleanup failed");
            }
        }
    }
}

async fn solve_challenges(order: &mut Order, challenges: &mut Challenges) -> Result<(), Error> {
    let url = order.url().to_string();
    {
        let mut authorizations = order.authorizations();
        while let Some(authz) = authorizations.next().await {
            let mut authz = authz?;
            let Identifier::Dns(domain) = authz.identifier().identifier.clone() else {
                continue;
            };
            if authz.status == AuthorizationStatus::Valid {
                debug!(domain = %domain, "authorization already valid");
                continue;
            }

            let mut challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| Error::NoDns01Challenge(domain.clone()))?;
            let key_authorization = challenge.key_authorization().as_str().to_string();
            let token = challenge.token.clone();
            challenges
                .present(&domain, &token, &key_authorization)
                .await?;
            challenge.set_ready().await?;
        }
    }
    wait_for(order, &url, OrderStatus::Ready).await
}

/// Poll `order` until it reaches `target`, failing as soon as it turns invalid.
async fn wait_for(order: &mut Order, url: &str, target: OrderStatus) -> Result<(), Error> {
    loop {
        let state = order.refresh().await?;
        if state.status == target || state.status == OrderStatus::Valid {
            return Ok(());
        }
        if state.status == OrderStatus::Invalid {
            return Err(Error::OrderFailed {
                url: url.to_string(),
                status: format!("{:?}", state.status),
            });
        }
        debug!(order = url, status = ?state.status, "waiting for order");
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[async_trait::async_trait]
impl AcmeClient for InstantAcmeClient {
    async fn obtain(&self, domains: &[String]) -> Result<Issued, Error> {
        self.run_order("obtain", domains).await
    }

    async fn renew(&self, previous: &CertificateBundle) -> Result<Issued, Error> {
        self.run_order("renew", &previous.domains).await
    }

    async fn fetch(&self, url: &str) -> Result<String, Error> {
        within(self.timeout, "fetch", async {
            let mut order = self.account.order(url.to_string()).await?;
            order.certificate().await?.ok_or_else(|| Error::OrderFailed {
                url: url.to_string(),
                status: format!("{:?}", order.state().status),
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        live: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl Dns01Provider for RecordingProvider {
        async fn present(&self, domain: &str, _token: &str, _key_authorization: &str) -> Result<(), Error> {
            self.live.lock().await.push(domain.to_string());
            Ok(())
        }

        async fn clean_up(&self, domain: &str, _token: &str, _key_authorization: &str) -> Result<(), Error> {
            self.live.lock().await.retain(|live| live != domain);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_clean_up_after_timeout() {
        let provider = Arc::new(RecordingProvider::default());
        let mut challenges = Challenges::new(provider.clone());

        // The CA never makes the order ready.
        let solved = within(Duration::from_millis(10), "obtain", async {
            challenges
                .present("*.local-ip.test", "token", "token.thumbprint")
                .await?;
            std::future::pending::<Result<(), Error>>().await
        })
        .await;
        assert!(matches!(
            solved,
            Err(Error::Timeout {
                operation: "obtain",
                ..
            })
        ));
        assert_eq!(*provider.live.lock().await, vec!["*.local-ip.test".to_string()]);

        challenges.clean_up().await;
        assert!(provider.live.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_within_passes_results_through() {
        let done = within(Duration::from_secs(1), "fetch", async { Ok(7) }).await;
        assert_eq!(done.unwrap(), 7);

        let failed: Result<(), Error> = within(Duration::from_secs(1), "fetch", async {
            Err(Error::NoDns01Challenge("local-ip.test".to_string()))
        })
        .await;
        assert!(matches!(failed, Err(Error::NoDns01Challenge(_))));
    }
}
