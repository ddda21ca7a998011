use crate::error::Error;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use trust_dns_server::client::rr::Name;

pub type SharedConfig = Arc<Config>;

/// Let's Encrypt production directory URL.
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL.
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Name of the zone-apex entry in [`Config::records`].
pub const APEX: &str = "@";

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub domain: String,
    pub email: String,
    pub nameservers: Vec<Ipv4Addr>,
    #[serde(default = "default_dns_port")]
    pub dns_port: u16,
    #[serde(default = "default_dns_bind_host")]
    pub dns_bind_host: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_dns_tcp_timeout")]
    pub dns_tcp_timeout: Duration,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_http_timeout")]
    pub http_timeout: Duration,
    #[serde(default)]
    pub staging: bool,
    #[serde(default)]
    pub ca_directory: Option<String>,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_acme_timeout")]
    pub acme_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_startup_delay")]
    pub startup_delay: Duration,
    #[serde(default)]
    pub records: HashMap<String, StaticRecords>,
}

/// Records served verbatim for one name of the zone. Keys of [`Config::records`] are relative
/// to [`Config::domain`], with [`APEX`] standing for the domain itself.
///
/// A missing field means the name has no record of that type.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticRecords {
    pub a: Option<Vec<Ipv4Addr>>,
    pub aaaa: Option<Vec<Ipv6Addr>>,
    pub txt: Option<Vec<String>>,
    pub mx: Option<Vec<MxRecord>>,
    pub cname: Option<Vec<String>>,
    pub srv: Option<SrvRecord>,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MxRecord {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SrvRecord {
    #[serde(default)]
    pub priority: u16,
    #[serde(default)]
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

fn default_dns_port() -> u16 {
    53
}

// fly.io only delivers UDP traffic to sockets bound on this alias.
#[allow(clippy::unnecessary_wraps)]
fn default_dns_bind_host() -> Option<String> {
    Some("fly-global-services".to_string())
}

fn default_dns_tcp_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_storage_root() -> PathBuf {
    PathBuf::from(".lego")
}

fn default_acme_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_renewal_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(300)
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(5)
}

impl Config {
    pub fn try_from_file(p: impl AsRef<Path>) -> Result<Self, Error> {
        let f = File::open(p)?;
        let reader = BufReader::new(f);
        let conf: Config = serde_json::from_reader(reader)?;
        conf.validate()?;
        Ok(conf)
    }

    /// The ACME directory certificates are requested from.
    #[must_use]
    pub fn ca_directory(&self) -> &str {
        match (&self.ca_directory, self.staging) {
            (Some(url), _) => url,
            (None, true) => LETSENCRYPT_STAGING,
            (None, false) => LETSENCRYPT_PRODUCTION,
        }
    }

    /// The zone apex as a fully qualified name.
    pub fn zone_name(&self) -> Result<Name, Error> {
        let domain = self.domain.trim_end_matches('.');
        Name::from_str(&format!("{domain}.")).map_err(|err| {
            Error::InvalidConfig(format!("domain \"{}\" is not a DNS name: {err}", self.domain))
        })
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let zone = self.zone_name()?;
        if zone.is_root() {
            return Err(Error::InvalidConfig("domain must not be the root".to_string()));
        }
        match self.email.split_once('@') {
            Some((user, host)) if !user.is_empty() && host.contains('.') => {}
            _ => {
                return Err(Error::InvalidConfig(format!(
                    "\"{}\" is not an email address",
                    self.email
                )))
            }
        }
        if self.nameservers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one nameserver address is required".to_string(),
            ));
        }
        if self
            .records
            .keys()
            .any(|name| name.trim_end_matches('.') == "_acme-challenge")
        {
            return Err(Error::InvalidConfig(
                "records may not be configured for the reserved _acme-challenge name".to_string(),
            ));
        }
        Ok(())
    }
}
