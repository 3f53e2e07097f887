//! The DNS-facing half: UDP and TCP listeners that hand parsed messages to
//! [`process_request`], which answers static A/NS queries itself and routes
//! AAAA/DNSKEY/NULL queries through the [`crate::dispatch`] chain.

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::dispatch::{dispatch, DispatchOutcome};
use crate::domain::{encoder_kind_for_qtype, ZoneConfig};
use crate::registry::Registry;
use crate::timeout::now_secs;
use crate::wire::message::{parse_query, QTYPE_A, QTYPE_NS};
use crate::wire::{Query, Reply};

pub struct DnsServer {
    zones: Vec<ZoneConfig>,
    registry: Arc<Registry>,
}

impl DnsServer {
    pub fn new(domains: &[String], ip_addr: Ipv4Addr, registry: Arc<Registry>) -> Self {
        let zones = domains
            .iter()
            .map(|d| ZoneConfig {
                domain: d.to_lowercase(),
                ip_addr,
            })
            .collect();
        Self { zones, registry }
    }

    fn zone_for<'a>(&'a self, qname: &str) -> Option<(&'a ZoneConfig, &'a str)> {
        self.zones.iter().find_map(|z| z.strip_suffix(qname).map(|rest| (z, rest)))
    }

    /// Parses a raw DNS message, answers it, and returns the packed reply
    /// bytes. `is_tcp` selects `pack_tcp` (no size cap) vs `pack_udp`
    /// (truncates with TC=1 past 575 bytes, per spec §6).
    pub async fn process_request(&self, msg: &[u8], is_tcp: bool) -> Option<Vec<u8>> {
        let query = match parse_query(msg) {
            Ok(q) => q,
            Err(e) => {
                debug!("dropping malformed DNS message: {}", e);
                return None;
            }
        };

        let mut reply = Reply::for_query(&query);
        self.answer(&query, &mut reply).await;

        Some(if is_tcp { reply.pack_tcp() } else { reply.pack_udp() })
    }

    async fn answer(&self, query: &Query, reply: &mut Reply) {
        let qname = query.qname.to_lowercase();
        let (zone, subdomain) = match self.zone_for(&qname) {
            Some(hit) => hit,
            None => return, // not one of our domains: empty answer, question still echoed
        };

        match query.qtype {
            QTYPE_A => reply.add_answer(zone.a_record()),
            QTYPE_NS => {
                for ns in zone.ns_records() {
                    reply.add_answer(ns);
                }
            }
            qtype => {
                let kind = match encoder_kind_for_qtype(qtype) {
                    Some(k) => k,
                    None => return, // unsupported qtype: empty answer (spec §6 ambient note)
                };
                let encoder = kind.instance();
                match dispatch(subdomain, &zone.domain, encoder, &self.registry, now_secs()).await {
                    DispatchOutcome::Answer(rdata) => {
                        for r in rdata {
                            reply.add_answer(r);
                        }
                    }
                    DispatchOutcome::Drop => {}
                }
            }
        }
    }

    pub async fn run_udp(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        log::info!("DNS UDP listener bound on {}", addr);
        let mut buf = [0u8; 4096];
        loop {
            let (len, peer) = socket.recv_from(&mut buf).await?;
            let msg = buf[..len].to_vec();
            let server = self.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                if let Some(reply) = server.process_request(&msg, false).await {
                    if let Err(e) = socket.send_to(&reply, peer).await {
                        warn!("UDP reply to {} failed: {}", peer, e);
                    }
                }
            });
        }
    }

    pub async fn run_tcp(self: Arc<Self>, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("DNS TCP listener bound on {}", addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_tcp_connection(stream).await {
                    debug!("DNS TCP connection from {} closed: {}", peer, e);
                }
            });
        }
    }

    async fn serve_tcp_connection(&self, mut stream: TcpStream) -> std::io::Result<()> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        loop {
            let len = match stream.read_u16().await {
                Ok(l) => l as usize,
                Err(_) => return Ok(()),
            };
            let mut msg = vec![0u8; len];
            stream.read_exact(&mut msg).await?;
            if let Some(reply) = self.process_request(&msg, true).await {
                stream.write_u16(reply.len() as u16).await?;
                stream.write_all(&reply).await?;
            }
        }
    }
}
