//! Packs tunnel frames into a DNSKEY RR's `key` field. Much larger payload
//! budget than the AAAA encoder (16 KiB vs 238 bytes) at the cost of using
//! a record type recursive resolvers are more likely to scrub.

use super::Encoder;
use crate::error::{BridgeError, Result};
use crate::wire::RData;

pub struct DnsKeyEncoder;

const MAX_PACKET_SIZE: usize = 16384;
const FLAGS: u16 = 257;
const PROTOCOL: u8 = 3;
const ALGORITHM: u8 = 253;

fn encode_data(status: u8, data: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(3 + data.len());
    key.push(status);
    key.extend_from_slice(&(data.len() as u16).to_le_bytes());
    key.extend_from_slice(data);
    key
}

fn to_dnskey(key: Vec<u8>) -> RData {
    RData::Dnskey {
        flags: FLAGS,
        protocol: PROTOCOL,
        algorithm: ALGORITHM,
        key,
    }
}

impl Encoder for DnsKeyEncoder {
    fn max_packet_size(&self) -> usize {
        MAX_PACKET_SIZE
    }

    fn encode_data_header(&self, sub_domain: &str, data_size: usize) -> Vec<RData> {
        let mut key_data = Vec::with_capacity(8);
        key_data.extend_from_slice(&sub_domain.as_bytes()[..4.min(sub_domain.len())]);
        key_data.extend_from_slice(&(data_size as u32).to_le_bytes());
        vec![to_dnskey(encode_data(0, &key_data))]
    }

    fn encode_packet(&self, data: &[u8]) -> Result<Vec<RData>> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(BridgeError::BlockIndexOutOfRange {
                index: 0,
                len: data.len(),
                block_size: MAX_PACKET_SIZE,
            });
        }
        Ok(vec![to_dnskey(encode_data(0, data))])
    }

    fn encode_ready_receive(&self) -> Vec<RData> {
        vec![to_dnskey(encode_data(0, &[]))]
    }

    fn encode_finish_send(&self) -> Vec<RData> {
        vec![to_dnskey(encode_data(1, &[]))]
    }

    fn encode_send_more_data(&self) -> Vec<RData> {
        // Identical on the wire to `encode_ready_receive` -- the original
        // implementation distinguishes these only by the session state the
        // caller is in, not by any bit in this sentinel.
        vec![to_dnskey(encode_data(0, &[]))]
    }

    fn encode_registration(&self, client_id: char, status: u8) -> Vec<RData> {
        vec![to_dnskey(encode_data(status, &[client_id as u8]))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_bytes(rdata: &RData) -> &[u8] {
        match rdata {
            RData::Dnskey { key, .. } => key,
            _ => panic!("expected DNSKEY"),
        }
    }

    #[test]
    fn ready_receive_and_send_more_data_share_wire_bytes() {
        let ready = DnsKeyEncoder.encode_ready_receive();
        let more = DnsKeyEncoder.encode_send_more_data();
        assert_eq!(key_bytes(&ready[0]), key_bytes(&more[0]));
    }

    #[test]
    fn finish_send_status_byte_is_one() {
        let finish = DnsKeyEncoder.encode_finish_send();
        assert_eq!(key_bytes(&finish[0])[0], 1);
    }

    #[test]
    fn data_header_packs_subdomain_then_little_endian_size() {
        let rdata = DnsKeyEncoder.encode_data_header("aaab", 1234);
        let key = key_bytes(&rdata[0]);
        // status, len_lo, len_hi, then 4 ascii + 4 bytes LE size
        assert_eq!(key[0], 0);
        let payload = &key[3..];
        assert_eq!(&payload[0..4], b"aaab");
        assert_eq!(u32::from_le_bytes(payload[4..8].try_into().unwrap()), 1234);
    }

    #[test]
    fn registration_carries_status_and_client_id() {
        let rdata = DnsKeyEncoder.encode_registration('q', 0);
        let key = key_bytes(&rdata[0]);
        assert_eq!(key[0], 0);
        assert_eq!(key[3], b'q');
    }

    #[test]
    fn encode_packet_rejects_oversized_payload() {
        let data = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(DnsKeyEncoder.encode_packet(&data).is_err());
    }

    #[test]
    fn encode_packet_roundtrips_through_key_field() {
        let data = b"some tunnel payload";
        let rdata = DnsKeyEncoder.encode_packet(data).unwrap();
        let key = key_bytes(&rdata[0]);
        assert_eq!(&key[3..], data);
    }
}
