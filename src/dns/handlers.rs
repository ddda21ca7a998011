use crate::dns::wildcard;
use crate::error::Error;
use crate::record_store::{RecordEntry, SharedRecordStore, STATIC_TTL};
use crate::zone::Zone;
use lazy_static::lazy_static;
use std::sync::Arc;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, error};
use trust_dns_proto::rr::rdata::SOA;
use trust_dns_server::authority::MessageResponseBuilder;
use trust_dns_server::client::op::{Header, MessageType, OpCode, ResponseCode};
use trust_dns_server::client::rr::{LowerName, Name, RData, Record, RecordType};
use trust_dns_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

/// TTL of addresses derived from the query name. They can never change, so cache them as long
/// as the static records.
const WILDCARD_TTL: u32 = STATIC_TTL;

/// TTL of the SOA record. Doubles as the negative caching TTL through `SOA_MINIMUM`.
const SOA_TTL: u32 = 300;
const SOA_REFRESH: i32 = 900;
const SOA_RETRY: i32 = 900;
const SOA_EXPIRE: i32 = 1_800;
const SOA_MINIMUM: u32 = 300;

lazy_static! {
    static ref SERIAL_FORMATTER: &'static [time::format_description::FormatItem<'static>] =
        format_description!(version = 2, "[year][month][day]");
}

/// The sections and response code of a reply, before it is bound to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub code: ResponseCode,
    pub answers: Vec<Record>,
    pub authority: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Answer {
    fn records(answers: Vec<Record>) -> Self {
        Answer {
            code: ResponseCode::NoError,
            answers,
            authority: Vec::new(),
            additionals: Vec::new(),
        }
    }

    fn negative(code: ResponseCode, soa: Record) -> Self {
        Answer {
            code,
            answers: Vec::new(),
            authority: vec![soa],
            additionals: Vec::new(),
        }
    }

    fn refused() -> Self {
        Answer {
            code: ResponseCode::Refused,
            answers: Vec::new(),
            authority: Vec::new(),
            additionals: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct Handler {
    zone: Arc<Zone>,
    store: SharedRecordStore,
}

impl Handler {
    pub(super) fn new(zone: Arc<Zone>, store: SharedRecordStore) -> Self {
        Handler { zone, store }
    }

    async fn dispatch_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response: R,
    ) -> Result<ResponseInfo, Error> {
        // Anything but a standard query is refused.
        if request.op_code() != OpCode::Query || request.message_type() != MessageType::Query {
            return self
                .send_error(request, response, ResponseCode::Refused)
                .await;
        }

        // Messages without exactly one question never get here: trust-dns answers them FORMERR
        // while parsing the request.
        let query = request.query().original();
        let answer = self.answer(query.name(), query.query_type()).await;
        self.send_answer(request, response, &answer).await
    }

    /// Build the reply to a single question. Answers are owned by `name` as asked, case
    /// included; lookups use its lowercase form.
    ///
    /// Every negative reply for a name inside the zone carries the zone SOA in its authority
    /// section, so resolvers can cache it.
    pub async fn answer(&self, name: &Name, query_type: RecordType) -> Answer {
        let lower = LowerName::new(name);
        if !self.zone.contains(&lower) {
            debug!("refusing query for \"{name}\" outside of zone \"{}\"", self.zone.apex());
            return Answer::refused();
        }

        match query_type {
            RecordType::A => self.answer_a(&lower, name).await,
            RecordType::NS => self.answer_ns(name).await,
            RecordType::SOA => self.answer_soa(&lower),
            RecordType::AAAA
            | RecordType::TXT
            | RecordType::MX
            | RecordType::CNAME
            | RecordType::SRV => self.answer_from_store(&lower, name, query_type).await,
            _ => Answer::negative(ResponseCode::NoError, self.soa_record()),
        }
    }

    async fn answer_a(&self, name: &LowerName, owner: &Name) -> Answer {
        match self.resolve_a(name).await {
            Some(entry) => Answer::records(records(owner, &entry)),
            None => {
                debug!("no address for \"{name}\"");
                Answer::negative(ResponseCode::NXDomain, self.soa_record())
            }
        }
    }

    async fn answer_ns(&self, owner: &Name) -> Answer {
        let mut answers = Vec::new();
        let mut additionals = Vec::new();
        for ns in self.zone.nameservers() {
            answers.push(Record::from_rdata(
                owner.clone(),
                STATIC_TTL,
                RData::NS((&ns.name).into()),
            ));
            if let Some(glue) = self.resolve_a(&ns.name).await {
                additionals.extend(records(&(&ns.name).into(), &glue));
            }
        }
        Answer {
            additionals,
            ..Answer::records(answers)
        }
    }

    fn answer_soa(&self, name: &LowerName) -> Answer {
        if name == self.zone.apex() {
            Answer::records(vec![self.soa_record()])
        } else {
            Answer::negative(ResponseCode::NoError, self.soa_record())
        }
    }

    async fn answer_from_store(
        &self,
        name: &LowerName,
        owner: &Name,
        query_type: RecordType,
    ) -> Answer {
        match self.store.lookup(name, query_type).await {
            Some(entry) if !entry.rdata.is_empty() => Answer::records(records(owner, &entry)),
            _ => {
                debug!("no {query_type} records for \"{name}\"");
                Answer::negative(ResponseCode::NoError, self.soa_record())
            }
        }
    }

    /// Address records for `name`: the store first, then the address embedded in the name.
    async fn resolve_a(&self, name: &LowerName) -> Option<RecordEntry> {
        if let Some(entry) = self.store.lookup(name, RecordType::A).await {
            if !entry.rdata.is_empty() {
                return Some(entry);
            }
        }
        let addr = wildcard::resolve(&name.to_string(), &self.zone.apex().to_string())?;
        debug!("{name} => {addr}");
        Some(RecordEntry {
            ttl: WILDCARD_TTL,
            rdata: vec![RData::A(addr)],
        })
    }

    fn soa_record(&self) -> Record {
        // NB: unwraps are safe: known date format producing values that will always parse as u32.
        let serial: u32 = OffsetDateTime::now_utc()
            .format(&SERIAL_FORMATTER)
            .unwrap()
            .parse()
            .unwrap();
        let soa = SOA::new(
            self.zone.primary_nameserver().into(),
            self.zone.admin().clone(),
            serial,
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            SOA_MINIMUM,
        );
        Record::from_rdata(self.zone.apex().into(), SOA_TTL, RData::SOA(soa))
    }

    async fn send_answer<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        answer: &Answer,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(false);
        header.set_response_code(answer.code);
        let response = builder.build(
            header,
            answer.answers.iter(),
            answer.authority.iter(),
            &[],
            answer.additionals.iter(),
        );
        Ok(response_handle.send_response(response).await?)
    }

    async fn send_error<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        code: ResponseCode,
    ) -> Result<ResponseInfo, Error> {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_recursion_available(false);
        header.set_response_code(code);
        Ok(response_handle
            .send_response(builder.build_no_records(header))
            .await?)
    }
}

fn records(owner: &Name, entry: &RecordEntry) -> Vec<Record> {
    entry
        .rdata
        .iter()
        .map(|rd| Record::from_rdata(owner.clone(), entry.ttl, rd.clone()))
        .collect()
}

#[async_trait::async_trait]
impl RequestHandler for Handler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        match self.dispatch_request(request, response_handle).await {
            Ok(info) => info,
            Err(error) => {
                error!("error in RequestHandler: {:?}", error);
                let mut header = Header::new();
                header.set_response_code(ResponseCode::ServFail);
                header.into()
            }
        }
    }
}
