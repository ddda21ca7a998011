//! Address extraction from query names.
//!
//! Two grammars are recognised, tried in this order:
//!
//! 1. dashed: the label immediately preceding the zone is `a-b-c-d`,
//!    e.g. `foo.192-168-1-29.local-ip.sh.`
//! 2. dotted: the last four labels preceding the zone are `a.b.c.d`,
//!    e.g. `foo.192.168.1.29.local-ip.sh.`
//!
//! Every octet must be a canonical decimal in `0..=255`; anything else is no match rather than
//! a clamped or defaulted address.

use std::net::Ipv4Addr;
use std::str::FromStr;

/// Extract the IPv4 address embedded in `name`, a name below `zone`.
///
/// Both arguments are expected lowercase; a trailing dot is optional on either.
#[must_use]
pub fn resolve(name: &str, zone: &str) -> Option<Ipv4Addr> {
    let labels = labels_below(name, zone)?;
    dashed(&labels).or_else(|| dotted(&labels))
}

fn labels_below<'a>(name: &'a str, zone: &str) -> Option<Vec<&'a str>> {
    let name = name.strip_suffix('.').unwrap_or(name);
    let zone = zone.strip_suffix('.').unwrap_or(zone);
    let prefix = name.strip_suffix(zone)?.strip_suffix('.')?;
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.split('.').collect())
}

fn dashed(labels: &[&str]) -> Option<Ipv4Addr> {
    let label = labels.last()?;
    if label.split('-').count() != 4 {
        return None;
    }
    Ipv4Addr::from_str(&label.replace('-', ".")).ok()
}

fn dotted(labels: &[&str]) -> Option<Ipv4Addr> {
    let first = labels.len().checked_sub(4)?;
    Ipv4Addr::from_str(&labels[first..].join(".")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONE: &str = "local-ip.sh.";

    #[test]
    fn test_dashed() {
        assert_eq!(
            resolve("192-168-1-29.local-ip.sh.", ZONE),
            Some(Ipv4Addr::new(192, 168, 1, 29))
        );
        assert_eq!(
            resolve("app.10-0-0-1.local-ip.sh.", ZONE),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(resolve("192-168-1-29.local-ip.sh", ZONE), Some(Ipv4Addr::new(192, 168, 1, 29)));
    }

    #[test]
    fn test_dotted() {
        assert_eq!(
            resolve("192.168.1.29.local-ip.sh.", ZONE),
            Some(Ipv4Addr::new(192, 168, 1, 29))
        );
        assert_eq!(
            resolve("prefixed.192.168.1.29.local-ip.sh.", ZONE),
            Some(Ipv4Addr::new(192, 168, 1, 29))
        );
    }

    #[test]
    fn test_dashed_prefix_of_dotted_is_no_match() {
        assert_eq!(resolve("prefixed-192.168.1.29.local-ip.sh.", ZONE), None);
    }

    #[test]
    fn test_dashed_is_tried_first() {
        assert_eq!(
            resolve("1.2.3.4.5-6-7-8.local-ip.sh.", ZONE),
            Some(Ipv4Addr::new(5, 6, 7, 8))
        );
    }

    #[test]
    fn test_malformed_octets() {
        assert_eq!(resolve("256-1-1-1.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("1.2.3.999.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("01-2-3-4.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("1-2-3.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("1-2-3-4-5.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("1--3-4.local-ip.sh.", ZONE), None);
        assert_eq!(resolve("2.3.4.local-ip.sh.", ZONE), None);
    }

    #[test]
    fn test_outside_zone() {
        assert_eq!(resolve("1-2-3-4.example.com.", ZONE), None);
        assert_eq!(resolve("1-2-3-4.notlocal-ip.sh.", ZONE), None);
        assert_eq!(resolve("local-ip.sh.", ZONE), None);
    }
}
