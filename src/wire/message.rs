//! Minimal DNS message codec: just enough header/question/answer handling
//! to parse a tunnel query and build a reply. Not a general resolver — no
//! recursion, no arbitrary RR types beyond the ones the tunnel needs.

use super::name::{encode_name, parse_name};
use crate::error::{BridgeError, Result};

pub const QTYPE_A: u16 = 1;
pub const QTYPE_NS: u16 = 2;
pub const QTYPE_NULL: u16 = 10;
pub const QTYPE_AAAA: u16 = 28;
pub const QTYPE_DNSKEY: u16 = 48;
pub const QCLASS_IN: u16 = 1;

const HEADER_LEN: usize = 12;
/// §6: replies above this size must be retransmitted with TC=1 and an empty
/// answer section, over UDP only.
pub const MAX_UDP_REPLY_SIZE: usize = 575;

const FLAG_QR: u16 = 1 << 15;
const FLAG_AA: u16 = 1 << 10;
const FLAG_TC: u16 = 1 << 9;
const FLAG_RA: u16 = 1 << 7;

#[derive(Debug, Clone)]
pub struct Query {
    pub id: u16,
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Parses the header and first question of a DNS message. Answer/authority/
/// additional sections (if any) are ignored: queries never carry them.
pub fn parse_query(msg: &[u8]) -> Result<Query> {
    if msg.len() < HEADER_LEN {
        return Err(BridgeError::MalformedMessage("message shorter than a DNS header".into()));
    }
    let id = u16::from_be_bytes([msg[0], msg[1]]);
    let qdcount = u16::from_be_bytes([msg[4], msg[5]]);
    if qdcount == 0 {
        return Err(BridgeError::MalformedMessage("query carries no questions".into()));
    }
    let (qname, pos) = parse_name(msg, HEADER_LEN)?;
    let rest = msg
        .get(pos..pos + 4)
        .ok_or_else(|| BridgeError::MalformedMessage("truncated question".into()))?;
    let qtype = u16::from_be_bytes([rest[0], rest[1]]);
    let qclass = u16::from_be_bytes([rest[2], rest[3]]);
    Ok(Query {
        id,
        qname,
        qtype,
        qclass,
    })
}

/// One answer-section resource record. `ttl` is always 1 per §6.
#[derive(Debug, Clone)]
pub enum RData {
    A([u8; 4]),
    Ns(String),
    Aaaa(std::net::Ipv6Addr),
    Dnskey { flags: u16, protocol: u8, algorithm: u8, key: Vec<u8> },
    Null(Vec<u8>),
}

impl RData {
    fn qtype(&self) -> u16 {
        match self {
            RData::A(_) => QTYPE_A,
            RData::Ns(_) => QTYPE_NS,
            RData::Aaaa(_) => QTYPE_AAAA,
            RData::Dnskey { .. } => QTYPE_DNSKEY,
            RData::Null(_) => QTYPE_NULL,
        }
    }

    fn encode_rdata(&self) -> Vec<u8> {
        match self {
            RData::A(octets) => octets.to_vec(),
            RData::Ns(name) => encode_name(name),
            RData::Aaaa(addr) => addr.octets().to_vec(),
            RData::Dnskey { flags, protocol, algorithm, key } => {
                let mut v = Vec::with_capacity(4 + key.len());
                v.extend_from_slice(&flags.to_be_bytes());
                v.push(*protocol);
                v.push(*algorithm);
                v.extend_from_slice(key);
                v
            }
            RData::Null(bytes) => bytes.clone(),
        }
    }
}

/// A reply under construction: header fields plus a growing answer section.
/// Questions are always echoed verbatim (spec §6/§10.6).
pub struct Reply {
    id: u16,
    qname_raw: Vec<u8>,
    qtype: u16,
    qclass: u16,
    answers: Vec<RData>,
}

impl Reply {
    pub fn for_query(query: &Query) -> Self {
        Self {
            id: query.id,
            qname_raw: encode_name(&query.qname),
            qtype: query.qtype,
            qclass: query.qclass,
            answers: Vec::new(),
        }
    }

    pub fn add_answer(&mut self, rdata: RData) {
        self.answers.push(rdata);
    }

    fn pack(&self, truncated: bool) -> Vec<u8> {
        let mut flags = FLAG_QR | FLAG_AA | FLAG_RA;
        if truncated {
            flags |= FLAG_TC;
        }

        let ancount: u16 = if truncated { 0 } else { self.answers.len() as u16 };

        let mut out = Vec::new();
        out.extend_from_slice(&self.id.to_be_bytes());
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        out.extend_from_slice(&ancount.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // nscount
        out.extend_from_slice(&0u16.to_be_bytes()); // arcount

        out.extend_from_slice(&self.qname_raw);
        out.extend_from_slice(&self.qtype.to_be_bytes());
        out.extend_from_slice(&self.qclass.to_be_bytes());

        if !truncated {
            for rdata in &self.answers {
                out.extend_from_slice(&self.qname_raw);
                out.extend_from_slice(&rdata.qtype().to_be_bytes());
                out.extend_from_slice(&QCLASS_IN.to_be_bytes());
                out.extend_from_slice(&1u32.to_be_bytes()); // ttl=1, always
                let rdata_bytes = rdata.encode_rdata();
                out.extend_from_slice(&(rdata_bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(&rdata_bytes);
            }
        }

        out
    }

    /// Packs the reply for a UDP response: if the full packing exceeds
    /// `MAX_UDP_REPLY_SIZE`, retransmits truncated with an empty answer
    /// section and TC=1 (§6).
    pub fn pack_udp(&self) -> Vec<u8> {
        let full = self.pack(false);
        if full.len() > MAX_UDP_REPLY_SIZE {
            self.pack(true)
        } else {
            full
        }
    }

    /// Packs the reply for TCP: no size cap, never truncated.
    pub fn pack_tcp(&self) -> Vec<u8> {
        self.pack(false)
    }
}

/// Builds a raw DNS query message. Used by this module's own tests and, via
/// `#[cfg(test)]`, by integration-style unit tests elsewhere in the crate
/// that need a real wire-format query to feed to [`crate::server::DnsServer`].
#[cfg(test)]
pub(crate) fn encode_query_for_test(qname: &str, qtype: u16) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(&0x1234u16.to_be_bytes());
    msg.extend_from_slice(&0x0100u16.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&encode_name(qname));
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&QCLASS_IN.to_be_bytes());
    msg
}
