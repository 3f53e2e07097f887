//! Static DNS behavior for the authoritative domains: A/NS answers and the
//! qtype→encoder routing table. Everything dynamic (AAAA/DNSKEY tunnel
//! traffic) is handed off to the dispatcher; this module only owns the
//! parts of `spec.md` §1 called "non-tunnel DNS behavior ... trivial".

use std::net::Ipv4Addr;

use crate::encoders::EncoderKind;
use crate::wire::message::{QTYPE_AAAA, QTYPE_DNSKEY, QTYPE_NULL};
use crate::wire::RData;

/// One authoritative zone this server answers for.
#[derive(Debug, Clone)]
pub struct ZoneConfig {
    pub domain: String,
    pub ip_addr: Ipv4Addr,
}

impl ZoneConfig {
    /// `None` if `qname` isn't under this zone.
    pub fn strip_suffix<'a>(&self, qname: &'a str) -> Option<&'a str> {
        let suffix = format!(".{}", self.domain);
        if qname == self.domain {
            Some("")
        } else {
            qname.strip_suffix(&suffix)
        }
    }

    pub fn a_record(&self) -> RData {
        RData::A(self.ip_addr.octets())
    }

    pub fn ns_records(&self) -> Vec<RData> {
        vec![
            RData::Ns(format!("ns1.{}", self.domain)),
            RData::Ns(format!("ns2.{}", self.domain)),
        ]
    }
}

/// Maps a DNS qtype to the encoder strategy that drives it (spec §6).
pub fn encoder_kind_for_qtype(qtype: u16) -> Option<EncoderKind> {
    match qtype {
        QTYPE_AAAA => Some(EncoderKind::Ipv6),
        QTYPE_DNSKEY => Some(EncoderKind::DnsKey),
        QTYPE_NULL => Some(EncoderKind::Null),
        _ => None,
    }
}
