//! Placeholder NULL-RR encoding strategy. The dispatcher can route a client
//! here (`spec.md` §4.2, Open Question) but no wire format for it has ever
//! been finalized upstream; every operation is a deliberate no-op rather
//! than a panic so a misrouted client degrades instead of crashing the
//! server.

use super::Encoder;
use crate::error::Result;
use crate::wire::RData;

pub struct NullEncoder;

impl Encoder for NullEncoder {
    fn max_packet_size(&self) -> usize {
        0
    }

    fn encode_data_header(&self, _sub_domain: &str, _data_size: usize) -> Vec<RData> {
        Vec::new()
    }

    fn encode_packet(&self, _data: &[u8]) -> Result<Vec<RData>> {
        Ok(Vec::new())
    }

    fn encode_ready_receive(&self) -> Vec<RData> {
        Vec::new()
    }

    fn encode_finish_send(&self) -> Vec<RData> {
        Vec::new()
    }

    fn encode_send_more_data(&self) -> Vec<RData> {
        Vec::new()
    }

    fn encode_registration(&self, _client_id: char, _status: u8) -> Vec<RData> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_is_empty_not_panicking() {
        assert!(NullEncoder.encode_data_header("aaaa", 10).is_empty());
        assert!(NullEncoder.encode_packet(b"data").unwrap().is_empty());
        assert!(NullEncoder.encode_ready_receive().is_empty());
        assert!(NullEncoder.encode_finish_send().is_empty());
        assert!(NullEncoder.encode_send_more_data().is_empty());
        assert!(NullEncoder.encode_registration('a', 0).is_empty());
    }

    #[test]
    fn max_packet_size_is_zero() {
        assert_eq!(NullEncoder.max_packet_size(), 0);
    }
}
