//! DNS-01 challenge provider backed by the server's own [`RecordStore`][crate::record_store].

use crate::error::Error;
use crate::record_store::SharedRecordStore;
use crate::zone::ACME_CHALLENGE_LABEL;
use base64::engine::general_purpose;
use base64::{alphabet, engine, Engine};
use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use trust_dns_server::client::rr::{LowerName, Name};

lazy_static! {
    static ref BASE64_ENGINE: engine::GeneralPurpose =
        engine::GeneralPurpose::new(&alphabet::URL_SAFE, general_purpose::NO_PAD);
}

/// The two operations an ACME client needs to solve DNS-01 challenges.
#[async_trait::async_trait]
pub trait Dns01Provider: Send + Sync {
    /// Publish the challenge response for `domain` before the CA is asked to validate it.
    async fn present(&self, domain: &str, token: &str, key_authorization: &str) -> Result<(), Error>;

    /// Withdraw the challenge response once validation is over, successful or not.
    async fn clean_up(&self, domain: &str, token: &str, key_authorization: &str)
        -> Result<(), Error>;
}

/// The TXT record answering the DNS-01 challenge for `domain`: its FQDN
/// (`_acme-challenge.<domain>.`) and value (the unpadded base64url SHA-256 digest of the key
/// authorization). A wildcard `domain` is validated at its base name.
pub fn challenge_record(domain: &str, key_authorization: &str) -> Result<(LowerName, String), Error> {
    let domain = domain.strip_prefix("*.").unwrap_or(domain);
    let domain = domain.trim_end_matches('.');
    let fqdn = Name::from_str(&format!("{ACME_CHALLENGE_LABEL}.{domain}."))?;
    let digest = Sha256::digest(key_authorization.as_bytes());
    Ok((fqdn.into(), BASE64_ENGINE.encode(digest)))
}

/// Solves challenges by writing the record into the store the DNS server answers from. The
/// store itself only accepts writes to the zone's `_acme-challenge` name, so a challenge for any
/// other domain is dropped (and will fail validation) instead of creating records.
#[derive(Clone)]
pub struct RecordStoreProvider {
    store: SharedRecordStore,
}

impl RecordStoreProvider {
    #[must_use]
    pub fn new(store: SharedRecordStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Dns01Provider for RecordStoreProvider {
    async fn present(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<(), Error> {
        tracing::debug!(domain, "DNS-01 challenge - present");
        let (fqdn, value) = challenge_record(domain, key_authorization)?;
        self.store.set_challenge_txt(&fqdn, &value).await;
        Ok(())
    }

    async fn clean_up(&self, domain: &str, _token: &str, key_authorization: &str) -> Result<(), Error> {
        tracing::debug!(domain, "DNS-01 challenge - cleanup");
        let (fqdn, _) = challenge_record(domain, key_authorization)?;
        self.store.clear_challenge_txt(&fqdn).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::RecordStore;
    use crate::zone::Zone;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use trust_dns_server::client::rr::rdata::TXT;
    use trust_dns_server::client::rr::{RData, RecordType};

    fn store() -> SharedRecordStore {
        let zone = Zone::new(
            &Name::from_str("local-ip.test.").unwrap(),
            "admin@local-ip.test",
            &[Ipv4Addr::new(10, 0, 0, 1)],
        )
        .unwrap();
        Arc::new(RecordStore::new(&zone, &HashMap::new()).unwrap())
    }

    fn challenge_name() -> LowerName {
        LowerName::from(Name::from_str("_acme-challenge.local-ip.test.").unwrap())
    }

    #[test]
    fn test_challenge_record() {
        // RFC 8555 section 8.4: base64url(SHA-256(key authorization)) without padding.
        let (fqdn, value) = challenge_record("*.local-ip.test", "token.thumbprint").unwrap();
        assert_eq!(fqdn, challenge_name());
        assert_eq!(value.len(), 43);
        assert!(!value.contains('='));
        assert_eq!(
            BASE64_ENGINE.decode(&value).unwrap(),
            Sha256::digest(b"token.thumbprint").to_vec()
        );

        let (root_fqdn, root_value) = challenge_record("local-ip.test", "token.thumbprint").unwrap();
        assert_eq!(root_fqdn, fqdn);
        assert_eq!(root_value, value);
    }

    #[tokio::test]
    async fn test_present_and_clean_up() {
        let store = store();
        let provider = RecordStoreProvider::new(store.clone());
        let (_, value) = challenge_record("local-ip.test", "key-auth").unwrap();

        provider
            .present("local-ip.test", "token", "key-auth")
            .await
            .unwrap();
        let entry = store
            .lookup(&challenge_name(), RecordType::TXT)
            .await
            .unwrap();
        assert_eq!(entry.rdata, vec![RData::TXT(TXT::new(vec![value]))]);

        provider
            .clean_up("local-ip.test", "token", "key-auth")
            .await
            .unwrap();
        let entry = store
            .lookup(&challenge_name(), RecordType::TXT)
            .await
            .unwrap();
        assert!(entry.rdata.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_domain_is_not_written() {
        let store = store();
        let provider = RecordStoreProvider::new(store.clone());

        provider
            .present("example.com", "token", "key-auth")
            .await
            .unwrap();
        let foreign = LowerName::from(Name::from_str("_acme-challenge.example.com.").unwrap());
        assert!(store.lookup(&foreign, RecordType::TXT).await.is_none());
        let entry = store
            .lookup(&challenge_name(), RecordType::TXT)
            .await
            .unwrap();
        assert!(entry.rdata.is_empty());
    }
}
