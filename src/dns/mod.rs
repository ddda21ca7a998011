//! Authoritative DNS server.
//!
//! # Wildcard Addresses
//!
//! wildip answers `A` class queries for any name below
//! [`Config::domain`][`crate::config::Config::domain`] that embeds an IPv4 address, without a
//! lookup table. The address is either the dashed label right before the domain, or the last
//! four dotted labels before it.
//!
//! E.g. with config:
//! ```json
//! {
//!   "domain": "local-ip.sh",
//!   ...
//! }
//! ```
//!
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 +short 192-168-1-29.local-ip.sh A
//! 192.168.1.29
//! ❯ dig @127.0.0.1 -p 5353 +short my-app.192.168.1.29.local-ip.sh A
//! 192.168.1.29
//! ```
//!
//! Names that embed no valid address get `NXDOMAIN` with the zone `SOA` in the authority
//! section.
//!
//! # Dynamic TXT Record
//!
//! `_acme-challenge.<domain>` answers `TXT` queries with the [RFC-8555][RFC-8555] [DNS-01]
//! challenge response while a certificate order for the domain is pending, and with an empty
//! answer otherwise. See [`crate::certs`].
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
//! # Static Records
//!
//! ## NS
//!
//! Each address of [`Config::nameservers`][`crate::config::Config::nameservers`] becomes a
//! nameserver `ns1.<domain>`, `ns2.<domain>`, ... in the configured order. `NS` queries are
//! answered with all of them, with their `A` records as glue in the additional section.
//!
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 local-ip.sh NS
//! ;; ANSWER SECTION:
//! local-ip.sh.		604800	IN	NS	ns1.local-ip.sh.
//! local-ip.sh.		604800	IN	NS	ns2.local-ip.sh.
//!
//! ;; ADDITIONAL SECTION:
//! ns1.local-ip.sh.	604800	IN	A	137.66.40.11
//! ns2.local-ip.sh.	604800	IN	A	137.66.40.12
//! ```
//!
//! The domain itself resolves to the nameserver addresses.
//!
//! ## SOA
//!
//! The `SOA` of the domain names `ns1.<domain>` as primary and
//! [`Config::email`][`crate::config::Config::email`] as the responsible mailbox.
//!
//! ```bash
//! ❯ dig @127.0.0.1 -p 5353 local-ip.sh +short SOA
//! ns1.local-ip.sh. admin.local-ip.sh. 20230312 900 900 1800 300
//! ```
//!
//! _Note: The zone serial (`20230312`) will differ based on the date the query is performed._
//!
//! ## AAAA, TXT, MX, CNAME, SRV
//!
//! Served from [`Config::records`][`crate::config::Config::records`] only. Names without records
//! of the queried type get an empty `NOERROR` answer with the zone `SOA`.
//!
//! # Everything Else
//!
//! Other query types get an empty answer with the zone `SOA`, names outside the domain and
//! non-query opcodes get `REFUSED`, and messages without exactly one question get `FORMERR`.

mod handlers;
pub mod server;
pub mod wildcard;

pub use handlers::{Answer, Handler};
pub use server::{new, BindConfig, DnsServer};
