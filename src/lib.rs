//! wildip
//!
//! An authoritative DNS server for wildcard IP hostnames: `192-168-1-29.<domain>` and
//! `app.192.168.1.29.<domain>` resolve to `192.168.1.29`, without any lookup table.
//!
//! The server is also its own [RFC-8555][RFC-8555] [DNS-01] responder. It obtains and renews
//! certificates for `*.<domain>` and `<domain>` from an ACME CA, publishing the challenge TXT
//! record in its own zone, and serves them over HTTP(S).
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod certs;
pub mod config;
pub mod dns;
pub mod error;
pub mod http;
pub mod record_store;
pub mod zone;

pub use config::{Config, SharedConfig};
pub use dns::new as new_dns;
pub use http::serve as serve_http;
pub use record_store::{RecordStore, SharedRecordStore};
pub use zone::Zone;
