//! In-memory DNS record storage.
//!
//! A [`RecordStore`] holds every record a server instance answers from, keyed by canonical FQDN
//! and then by [`RecordType`]. All of it is fixed at construction except for the TXT record of
//! the reserved `_acme-challenge` name, which is written while an [RFC-8555][RFC-8555] [DNS-01]
//! challenge is pending and emptied again afterwards.
//!
//! Each server instance owns its store; nothing is shared across instances.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4

use crate::config::StaticRecords;
use crate::error::Error;
use crate::zone::Zone;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use trust_dns_proto::rr::rdata::{MX, SRV};
use trust_dns_server::client::rr::rdata::TXT;
use trust_dns_server::client::rr::{LowerName, Name, RData, RecordType};

/// TTL of records that only change with a configuration change: 1 week.
pub const STATIC_TTL: u32 = 604_800;

/// TTL of the challenge TXT record. Kept short so a renewal a day later isn't answered from a
/// resolver cache holding the previous value.
pub const CHALLENGE_TTL: u32 = 60;

/// `SharedRecordStore` is the handle to a [`RecordStore`] given to every component of one server
/// instance.
pub type SharedRecordStore = Arc<RecordStore>;

/// The records of one type at one name.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub ttl: u32,
    pub rdata: Vec<RData>,
}

impl RecordEntry {
    fn fixed(rdata: Vec<RData>) -> Self {
        Self {
            ttl: STATIC_TTL,
            rdata,
        }
    }
}

type RecordSet = HashMap<RecordType, RecordEntry>;

#[derive(Debug)]
pub struct RecordStore {
    challenge_name: LowerName,
    records: RwLock<HashMap<LowerName, RecordSet>>,
}

impl RecordStore {
    /// Build the store for `zone`.
    ///
    /// Every nameserver name gets an A record with its address, the apex gets an A record per
    /// nameserver address, `records` are added on top (replacing derived records of the same
    /// type), and an empty TXT slot is created for the challenge name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DNSError`] if a name in `records` (or one of their targets) isn't a
    /// valid DNS name.
    pub fn new(zone: &Zone, records: &HashMap<String, StaticRecords>) -> Result<Self, Error> {
        let mut table: HashMap<LowerName, RecordSet> = HashMap::new();

        for ns in zone.nameservers() {
            table
                .entry(ns.name.clone())
                .or_default()
                .entry(RecordType::A)
                .or_insert_with(|| RecordEntry::fixed(Vec::new()))
                .rdata
                .push(RData::A(ns.addr));
        }
        let apex_addrs = zone
            .nameservers()
            .iter()
            .map(|ns| RData::A(ns.addr))
            .collect();
        table
            .entry(zone.apex().clone())
            .or_default()
            .insert(RecordType::A, RecordEntry::fixed(apex_addrs));

        for (relative, statics) in records {
            let fqdn = zone.absolute(relative)?;
            let set = table.entry(fqdn).or_default();
            for (record_type, rdata) in static_rdata(statics)? {
                set.insert(record_type, RecordEntry::fixed(rdata));
            }
        }

        table.entry(zone.challenge_name().clone()).or_default().insert(
            RecordType::TXT,
            RecordEntry {
                ttl: CHALLENGE_TTL,
                rdata: Vec::new(),
            },
        );

        Ok(Self {
            challenge_name: zone.challenge_name().clone(),
            records: RwLock::new(table),
        })
    }

    /// Records of `record_type` at `fqdn`. `None` means there are no such records, while an entry
    /// with empty `rdata` is a slot that currently holds nothing (the challenge TXT between
    /// challenges).
    pub async fn lookup(&self, fqdn: &LowerName, record_type: RecordType) -> Option<RecordEntry> {
        self.records
            .read()
            .await
            .get(fqdn)
            .and_then(|set| set.get(&record_type))
            .cloned()
    }

    /// Replace the challenge TXT value. Only the reserved `_acme-challenge.<domain>.` name can be
    /// written; any other `fqdn` leaves the store untouched and returns false.
    pub async fn set_challenge_txt(&self, fqdn: &LowerName, value: &str) -> bool {
        info!("setting TXT record \"{value}\" for \"{fqdn}\"");
        self.write_challenge(fqdn, vec![RData::TXT(TXT::new(vec![value.to_string()]))])
            .await
    }

    /// Empty the challenge TXT slot. The same name restriction as
    /// [`RecordStore::set_challenge_txt`] applies.
    pub async fn clear_challenge_txt(&self, fqdn: &LowerName) -> bool {
        info!("clearing TXT record for \"{fqdn}\"");
        self.write_challenge(fqdn, Vec::new()).await
    }

    async fn write_challenge(&self, fqdn: &LowerName, rdata: Vec<RData>) -> bool {
        if *fqdn != self.challenge_name {
            warn!(
                "refused challenge write to \"{fqdn}\", only \"{}\" is writable",
                self.challenge_name
            );
            return false;
        }
        self.records
            .write()
            .await
            .entry(fqdn.clone())
            .or_default()
            .insert(
                RecordType::TXT,
                RecordEntry {
                    ttl: CHALLENGE_TTL,
                    rdata,
                },
            );
        true
    }
}

fn static_rdata(statics: &StaticRecords) -> Result<Vec<(RecordType, Vec<RData>)>, Error> {
    let mut out = Vec::new();
    if let Some(addrs) = &statics.a {
        out.push((RecordType::A, addrs.iter().copied().map(RData::A).collect()));
    }
    if let Some(addrs) = &statics.aaaa {
        out.push((
            RecordType::AAAA,
            addrs.iter().copied().map(RData::AAAA).collect(),
        ));
    }
    if let Some(txt) = &statics.txt {
        out.push((
            RecordType::TXT,
            txt.iter()
                .map(|s| RData::TXT(TXT::new(vec![s.clone()])))
                .collect(),
        ));
    }
    if let Some(mx) = &statics.mx {
        let rdata = mx
            .iter()
            .map(|mx| Ok(RData::MX(MX::new(mx.preference, fqdn(&mx.exchange)?))))
            .collect::<Result<Vec<_>, Error>>()?;
        out.push((RecordType::MX, rdata));
    }
    if let Some(cname) = &statics.cname {
        let rdata = cname
            .iter()
            .map(|target| Ok(RData::CNAME(fqdn(target)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        out.push((RecordType::CNAME, rdata));
    }
    if let Some(srv) = &statics.srv {
        out.push((
            RecordType::SRV,
            vec![RData::SRV(SRV::new(
                srv.priority,
                srv.weight,
                srv.port,
                fqdn(&srv.target)?,
            ))],
        ));
    }
    Ok(out)
}

// Targets in the config are absolute whether or not they carry the trailing dot.
fn fqdn(name: &str) -> Result<Name, Error> {
    let name = name.trim_end_matches('.');
    Ok(Name::from_str(&format!("{name}."))?)
}
