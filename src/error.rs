//! Error types.

use std::time::Duration;
use trust_dns_server::proto::error::ProtoError;

/// Error enumerates the possible wildip error states.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Returned by [`Config::try_from_file`][`crate::config::Config::try_from_file`] when the
    /// configuration parses as JSON but describes something the server can't run with, e.g. an
    /// empty nameserver list or a malformed email address.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    IO(#[from] std::io::Error),

    /// Returned when processing JSON from disk (the [`Config`][`crate::config::Config`], the
    /// persisted account metadata or a certificate bundle's `output.json`) fails due to invalid
    /// JSON content.
    #[error("invalid JSON")]
    InvalidJSON(#[from] serde_json::Error),

    /// Returned when the wildip DNS server encounters a generic DNS protocol error.
    #[error("DNS error")]
    DNSError(#[from] ProtoError),

    /// Returned when the certificate authority rejects a request, or can't be reached.
    #[error("ACME error: {0}")]
    Acme(#[from] instant_acme::Error),

    /// Returned when the ACME order reaches a state other than the one required to continue,
    /// e.g. it became invalid because the DNS-01 validation failed.
    #[error("ACME order {url} is {status}")]
    OrderFailed { url: String, status: String },

    /// Returned when an authorization of a new order doesn't offer a DNS-01 challenge.
    #[error("no DNS-01 challenge offered for \"{0}\"")]
    NoDns01Challenge(String),

    /// Returned when a single CA operation doesn't complete within the configured
    /// [`Config::acme_timeout`][`crate::config::Config::acme_timeout`].
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// Returned when generating the certificate key pair or signing request fails.
    #[error("CSR generation failed")]
    Csr(#[from] rcgen::Error),

    /// Returned when a PEM certificate chain can't be parsed far enough to read its expiry.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Returned when the persisted ACME account exists but its metadata or key can't be decoded.
    /// This is never retried: registering a fresh account would orphan the one the CA already
    /// knows about.
    #[error("invalid ACME account at {0}")]
    InvalidAccount(String),

    /// Returned when a certificate/key pair on disk can't be turned into TLS material.
    #[error("invalid TLS material: {0}")]
    Tls(String),
}

impl Error {
    /// Whether a failed certificate cycle should be retried on a later schedule tick.
    ///
    /// CA, network, timeout and IO failures are operational and recover by themselves; invalid
    /// configuration and a corrupt local account key need an operator.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::InvalidConfig(_) | Error::InvalidAccount(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::NoDns01Challenge("example.com".to_string()).is_recoverable());
        assert!(Error::Timeout {
            operation: "obtain",
            elapsed: Duration::from_secs(1)
        }
        .is_recoverable());
        assert!(!Error::InvalidConfig("no nameservers".to_string()).is_recoverable());
        assert!(!Error::InvalidAccount("keys/a.key".to_string()).is_recoverable());
    }
}
