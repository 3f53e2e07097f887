//! Packs tunnel frames into AAAA RDATA, 14 payload bytes per record across
//! up to 17 records. Byte placement within each hextet matches the
//! upstream `IPv6Encoder` bit-for-bit (`original_source/python/meterpreter/
//! dns_server.py`); the prose in `spec.md` §4.1 is a paraphrase of this.

use super::Encoder;
use crate::error::{BridgeError, Result};
use crate::wire::RData;
use std::net::Ipv6Addr;

pub struct Ipv6Encoder;

const MAX_IPV6RR_NUM: usize = 17;
const MAX_DATA_IN_RR: usize = 14;
const MAX_PACKET_SIZE: usize = MAX_IPV6RR_NUM * MAX_DATA_IN_RR;

fn align(mut hextets: Vec<u16>) -> [u16; 8] {
    hextets.resize(8, 0);
    hextets.try_into().expect("resized to 8")
}

fn hextets_to_rdata(hextets: Vec<u16>) -> RData {
    let h = align(hextets);
    RData::Aaaa(Ipv6Addr::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7]))
}

/// Builds the single-RR header announcing the next subdomain and the size
/// of the data now available.
fn encode_nextdomain_datasize(next_domain: &str, data_size: usize) -> Vec<u16> {
    let mut res = vec![0xfe81u16];
    for ch in next_domain.bytes() {
        res.push((ch as u16) << 8);
    }
    let overflow: u16 = if data_size <= MAX_PACKET_SIZE { 0 } else { 1 };
    res.push((overflow << 8) | (data_size as u16 & 0xff));
    res.push((((data_size >> 8) & 0xff) as u16) << 8 | (((data_size >> 16) & 0xff) as u16));
    res.push((((data_size >> 24) & 0xff) as u16) << 8);
    res
}

/// Builds the hextets for one data-bearing RR: a prefix/index/length
/// header hextet followed by up to 7 data hextets.
fn encode_data_prefix(prefix: u8, index: usize, data: &[u8]) -> Vec<u16> {
    debug_assert!(data.len() <= MAX_DATA_IN_RR);
    debug_assert!(index < MAX_IPV6RR_NUM);
    let mut res = Vec::with_capacity(1 + data.len() / 2 + 1);
    let high_byte = if index < 16 { (index as u16) << 4 } else { 0 } | data.len() as u16;
    res.push(((prefix as u16) << 8) | high_byte);

    let pairs = data.len() / 2;
    for i in 0..pairs {
        res.push(((data[i * 2] as u16) << 8) | data[i * 2 + 1] as u16);
    }
    if data.len() % 2 != 0 {
        res.push((data[data.len() - 1] as u16) << 8);
    }
    res
}

impl Encoder for Ipv6Encoder {
    fn max_packet_size(&self) -> usize {
        MAX_PACKET_SIZE
    }

    fn encode_data_header(&self, sub_domain: &str, data_size: usize) -> Vec<RData> {
        vec![hextets_to_rdata(encode_nextdomain_datasize(sub_domain, data_size))]
    }

    fn encode_packet(&self, data: &[u8]) -> Result<Vec<RData>> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(BridgeError::BlockIndexOutOfRange {
                index: 0,
                len: data.len(),
                block_size: MAX_PACKET_SIZE,
            });
        }
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let next_i = (i + MAX_DATA_IN_RR).min(data.len());
            let num_rr = i / MAX_DATA_IN_RR;
            let is_last = num_rr == MAX_IPV6RR_NUM - 1;
            let prefix = if is_last { 0xfe } else { 0xff };
            out.push(hextets_to_rdata(encode_data_prefix(prefix, num_rr, &data[i..next_i])));
            i = next_i;
        }
        Ok(out)
    }

    fn encode_ready_receive(&self) -> Vec<RData> {
        vec![RData::Aaaa(Ipv6Addr::new(0xffff, 0, 0, 0, 0, 0, 0, 0))]
    }

    fn encode_finish_send(&self) -> Vec<RData> {
        vec![RData::Aaaa(Ipv6Addr::new(0xffff, 0, 0, 0, 0, 0xff00, 0, 0))]
    }

    fn encode_send_more_data(&self) -> Vec<RData> {
        vec![RData::Aaaa(Ipv6Addr::new(0xffff, 0, 0, 0, 0, 0xf000, 0, 0))]
    }

    fn encode_registration(&self, client_id: char, _status: u8) -> Vec<RData> {
        // the original IPv6 sentinel never encodes `status`; kept faithful.
        vec![RData::Aaaa(Ipv6Addr::new(
            0xffff,
            (client_id as u8 as u16) << 8,
            0,
            0,
            0,
            0,
            0,
            0,
        ))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_receive_is_the_documented_sentinel() {
        let rdata = Ipv6Encoder.encode_ready_receive();
        match &rdata[0] {
            RData::Aaaa(addr) => assert_eq!(*addr, "ffff::".parse::<Ipv6Addr>().unwrap()),
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn finish_send_is_the_documented_sentinel() {
        let rdata = Ipv6Encoder.encode_finish_send();
        match &rdata[0] {
            RData::Aaaa(addr) => assert_eq!(*addr, "ffff::ff00:0:0".parse::<Ipv6Addr>().unwrap()),
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn send_more_data_is_the_documented_sentinel() {
        let rdata = Ipv6Encoder.encode_send_more_data();
        match &rdata[0] {
            RData::Aaaa(addr) => assert_eq!(*addr, "ffff::f000:0:0".parse::<Ipv6Addr>().unwrap()),
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn registration_places_client_id_in_second_hextet_high_byte() {
        let rdata = Ipv6Encoder.encode_registration('a', 0);
        match &rdata[0] {
            RData::Aaaa(addr) => {
                let segs = addr.segments();
                assert_eq!(segs[0], 0xffff);
                assert_eq!(segs[1], (b'a' as u16) << 8);
            }
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn encode_packet_rejects_oversized_payload() {
        let data = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(Ipv6Encoder.encode_packet(&data).is_err());
    }

    #[test]
    fn encode_packet_single_rr_has_continuation_prefix() {
        // "is_last" in the wire format means "this is RR #17 of a full
        // frame", not "this is the last RR of this call" -- a short,
        // single-RR frame is still marked 0xff (continuation). The implant
        // relies on the announced data_size, not this flag, to know when
        // it has every RR (spec.md §9 calls the flag advisory).
        let data = b"hello world!!"; // 13 bytes, fits in one RR
        let rr = Ipv6Encoder.encode_packet(data).unwrap();
        assert_eq!(rr.len(), 1);
        match &rr[0] {
            RData::Aaaa(addr) => {
                let segs = addr.segments();
                assert_eq!(segs[0] >> 8, 0xff);
                assert_eq!(segs[0] & 0xff, (0 << 4) | 13);
            }
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn encode_packet_spans_multiple_rrs_for_large_payload() {
        let data = vec![0x41u8; 30]; // needs 3 RRs of 14,14,2
        let rr = Ipv6Encoder.encode_packet(&data).unwrap();
        assert_eq!(rr.len(), 3);
    }

    #[test]
    fn encode_data_header_flags_overflow_only_past_max() {
        let hextets_ok = encode_nextdomain_datasize("aaaa", MAX_PACKET_SIZE);
        assert_eq!(hextets_ok[5] >> 8, 0);
        let hextets_over = encode_nextdomain_datasize("aaaa", MAX_PACKET_SIZE + 1);
        assert_eq!(hextets_over[5] >> 8, 1);
    }
}
