//! Static metadata of the zone a server instance is authoritative for.

use crate::config::Config;
use crate::error::Error;
use std::borrow::Cow;
use std::net::Ipv4Addr;
use std::str::FromStr;
use trust_dns_server::client::rr::{LowerName, Name};

/// Prefix of the single name the DNS-01 challenge TXT record may be written to.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// A nameserver of the zone, `ns<N>.<domain>.`, and the address it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServer {
    pub name: LowerName,
    pub addr: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct Zone {
    apex: LowerName,
    admin: Name,
    challenge: LowerName,
    nameservers: Vec<NameServer>,
}

impl Zone {
    /// Derive the zone from its apex, the administrative email and the ordered nameserver
    /// addresses. The first address becomes `ns1`, the second `ns2`, and so on.
    pub fn new(apex: &Name, email: &str, nameservers: &[Ipv4Addr]) -> Result<Self, Error> {
        if nameservers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one nameserver address is required".to_string(),
            ));
        }
        let apex = apex.to_lowercase();
        let admin = Name::from_str(&sanitized_admin(email))?.append_domain(&Name::root())?;
        let challenge = Name::from_str(ACME_CHALLENGE_LABEL)?.append_domain(&apex)?;
        let nameservers = nameservers
            .iter()
            .enumerate()
            .map(|(i, addr)| {
                let name = Name::from_str(&format!("ns{}", i + 1))?.append_domain(&apex)?;
                Ok(NameServer {
                    name: name.into(),
                    addr: *addr,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(Zone {
            apex: apex.into(),
            admin,
            challenge: challenge.into(),
            nameservers,
        })
    }

    pub fn try_from_config(config: &Config) -> Result<Self, Error> {
        Self::new(&config.zone_name()?, &config.email, &config.nameservers)
    }

    #[must_use]
    pub fn apex(&self) -> &LowerName {
        &self.apex
    }

    /// The SOA `RNAME`: the admin email with the `@` turned into a label separator.
    #[must_use]
    pub fn admin(&self) -> &Name {
        &self.admin
    }

    /// `_acme-challenge.<domain>.`, the only name whose records change at runtime.
    #[must_use]
    pub fn challenge_name(&self) -> &LowerName {
        &self.challenge
    }

    /// Nameservers in configured order. The first one is the SOA `MNAME`.
    #[must_use]
    pub fn nameservers(&self) -> &[NameServer] {
        &self.nameservers
    }

    #[must_use]
    pub fn primary_nameserver(&self) -> &LowerName {
        // NB: Zone::new refuses an empty nameserver list.
        &self.nameservers[0].name
    }

    /// Whether `name` is the apex or a name below it.
    #[must_use]
    pub fn contains(&self, name: &LowerName) -> bool {
        self.apex.zone_of(name)
    }

    /// Resolve a name relative to the apex, `@` meaning the apex itself.
    pub fn absolute(&self, relative: &str) -> Result<LowerName, Error> {
        let relative = relative.trim_end_matches('.');
        if relative == crate::config::APEX || relative.is_empty() {
            return Ok(self.apex.clone());
        }
        let apex: Name = (&self.apex).into();
        Ok(Name::from_str(relative)?.append_domain(&apex)?.into())
    }
}

// Dots in the local part must be escaped, or they'd be read as label separators.
fn sanitized_admin(email: &str) -> Cow<str> {
    match email.split_once('@') {
        Some((user, domain)) => {
            let user = user.replace('.', "\\.");
            Cow::Owned(format!("{user}.{domain}"))
        }
        _ => Cow::Borrowed(email),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        let apex = Name::from_str("Local-IP.test.").unwrap();
        Zone::new(
            &apex,
            "dns.admin@example.com",
            &[Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        )
        .unwrap()
    }

    #[test]
    fn test_nameserver_names_in_order() {
        let zone = zone();
        let names: Vec<String> = zone
            .nameservers()
            .iter()
            .map(|ns| ns.name.to_string())
            .collect();
        assert_eq!(names, vec!["ns1.local-ip.test.", "ns2.local-ip.test."]);
        assert_eq!(zone.primary_nameserver().to_string(), "ns1.local-ip.test.");
        assert_eq!(zone.nameservers()[1].addr, Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_admin_mailbox_escapes_local_part() {
        assert_eq!(sanitized_admin("dns.admin@example.com"), "dns\\.admin.example.com");
        assert_eq!(sanitized_admin("admin@example.com"), "admin.example.com");
        let zone = zone();
        assert_eq!(zone.admin().num_labels(), 3);
    }

    #[test]
    fn test_challenge_name() {
        assert_eq!(
            zone().challenge_name().to_string(),
            "_acme-challenge.local-ip.test."
        );
    }

    #[test]
    fn test_contains() {
        let zone = zone();
        let inside = LowerName::from(Name::from_str("1-2-3-4.local-ip.test.").unwrap());
        let outside = LowerName::from(Name::from_str("1-2-3-4.example.com.").unwrap());
        assert!(zone.contains(&inside));
        assert!(zone.contains(zone.apex()));
        assert!(!zone.contains(&outside));
    }

    #[test]
    fn test_absolute() {
        let zone = zone();
        assert_eq!(zone.absolute("@").unwrap(), *zone.apex());
        assert_eq!(
            zone.absolute("_dmarc").unwrap().to_string(),
            "_dmarc.local-ip.test."
        );
    }

    #[test]
    fn test_requires_nameservers() {
        let apex = Name::from_str("local-ip.test.").unwrap();
        assert!(Zone::new(&apex, "admin@example.com", &[]).is_err());
    }
}
