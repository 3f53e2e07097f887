//! Classifies a DNS query's tunnel subdomain into a session operation.
//! Patterns are tried in the fixed order from `spec.md` §4.2; the first
//! match wins.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::encoders::Encoder;
use crate::fragment::BlockSizedData;
use crate::registry::{Registry, SharedSession};
use crate::session::Session;
use crate::wire::RData;

pub enum DispatchOutcome {
    Answer(Vec<RData>),
    /// Protocol violation, domain mismatch, or resolution failure: no DNS
    /// answer should be sent (spec §7: "drop the query").
    Drop,
}

static STAGE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^7812\.000g\.(\d+)\.0\.(?P<client>\w+)$").unwrap());
static STAGE_CHUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^7812\.(?P<index>\d+)\.(\d+)\.0\.(?P<client>\w+)$").unwrap());
static UPLINK_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<size>\d+)\.(?P<padd>\d+)\.tx\.(\d+)\.(?P<client>\w)$").unwrap());
static UPLINK_CHUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^t\.(?P<b32>.*)\.(?P<idx>\d+)\.(?P<cnt>\d+)\.(?P<client>\w)$").unwrap());
static DOWNLINK_CHUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<sub_dom>\w{4})\.(?P<idx>\d+)\.(\d+)\.(?P<client>\w)$").unwrap());
static DOWNLINK_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<sub_dom>\w{4})\.g\.(\d+)\.(?P<client>\w)$").unwrap());
static REGISTRATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^7812\.reg0\.\d+\.(?P<server_id>\w+)$").unwrap());

async fn resolve_client(registry: &Registry, subdomain_domain: &str, client: char, domain: &str) -> Option<SharedSession> {
    let session = registry.lookup_client(client).await?;
    let matches_domain = session.lock().await.domain == domain;
    if !matches_domain {
        warn!("client {} resolved under domain mismatch ({} != {})", client, subdomain_domain, domain);
        return None;
    }
    Some(session)
}

/// Dispatches one tunnel query. `subdomain` is the qname with the
/// authoritative `domain` suffix already stripped (`domain::ZoneConfig::
/// strip_suffix`). `now` is used to update `Session::ts` on success.
pub async fn dispatch(
    subdomain: &str,
    domain: &str,
    encoder: &dyn Encoder,
    registry: &Registry,
    now: u64,
) -> DispatchOutcome {
    if let Some(caps) = REGISTRATION.captures(subdomain) {
        let server_id = caps["server_id"].to_string();
        return handle_registration(server_id, domain.to_string(), encoder, registry, now).await;
    }

    if let Some(caps) = STAGE_HEADER.captures(subdomain) {
        let server_id = &caps["client"];
        let stage = registry.stage_for(server_id).await;
        return DispatchOutcome::Answer(encoder.encode_data_header("7812", stage.len()));
    }

    if let Some(caps) = STAGE_CHUNK.captures(subdomain) {
        let server_id = &caps["client"];
        let index: usize = match caps["index"].parse() {
            Ok(v) => v,
            Err(_) => return DispatchOutcome::Drop,
        };
        let stage = registry.stage_for(server_id).await;
        if stage.is_empty() {
            return DispatchOutcome::Answer(encoder.encode_finish_send());
        }
        let block = BlockSizedData::new(stage, encoder.max_packet_size());
        return match block.get(index) {
            Ok((_is_last, slice)) => match encoder.encode_packet(slice) {
                Ok(rdata) => DispatchOutcome::Answer(rdata),
                Err(_) => DispatchOutcome::Drop,
            },
            Err(_) => DispatchOutcome::Drop,
        };
    }

    if let Some(caps) = UPLINK_HEADER.captures(subdomain) {
        let client: char = caps["client"].chars().next().unwrap();
        let (size, padd) = match (caps["size"].parse(), caps["padd"].parse()) {
            (Ok(s), Ok(p)) => (s, p),
            _ => return DispatchOutcome::Drop,
        };
        return with_session(registry, subdomain, client, domain, now, |s| s.incoming_data_header(size, padd, encoder)).await;
    }

    if let Some(caps) = UPLINK_CHUNK.captures(subdomain) {
        let client: char = caps["client"].chars().next().unwrap();
        let b32: String = caps["b32"].chars().filter(|c| *c != '.').collect();
        let (idx, cnt) = match (caps["idx"].parse::<i64>(), caps["cnt"].parse::<usize>()) {
            (Ok(i), Ok(c)) => (i, c),
            _ => return DispatchOutcome::Drop,
        };
        return with_session(registry, subdomain, client, domain, now, |s| s.incoming_data(&b32, idx, cnt, encoder)).await;
    }

    if let Some(caps) = DOWNLINK_CHUNK.captures(subdomain) {
        let client: char = caps["client"].chars().next().unwrap();
        let sub_dom = caps["sub_dom"].to_string();
        let idx: usize = match caps["idx"].parse() {
            Ok(v) => v,
            Err(_) => return DispatchOutcome::Drop,
        };
        return with_session(registry, subdomain, client, domain, now, |s| s.request_data(&sub_dom, idx, encoder)).await;
    }

    if let Some(caps) = DOWNLINK_HEADER.captures(subdomain) {
        let client: char = caps["client"].chars().next().unwrap();
        let sub_dom = caps["sub_dom"].to_string();
        return with_session_registering(registry, subdomain, client, domain, now, sub_dom, encoder).await;
    }

    DispatchOutcome::Drop
}

async fn handle_registration(
    server_id: String,
    domain: String,
    encoder: &dyn Encoder,
    registry: &Registry,
    now: u64,
) -> DispatchOutcome {
    let client_id = match registry.allocate_client_id().await {
        Some(id) => id,
        None => return DispatchOutcome::Answer(encoder.encode_finish_send()),
    };
    let session = std::sync::Arc::new(tokio::sync::Mutex::new(Session::new(domain, client_id, server_id, now)));
    registry.insert_session(client_id, session).await;
    DispatchOutcome::Answer(Session::register_client(encoder, client_id))
}

async fn with_session<F>(
    registry: &Registry,
    subdomain: &str,
    client: char,
    domain: &str,
    now: u64,
    op: F,
) -> DispatchOutcome
where
    F: FnOnce(&mut Session) -> Vec<RData>,
{
    match resolve_client(registry, subdomain, client, domain).await {
        Some(session) => {
            let mut guard = session.lock().await;
            guard.touch(now);
            DispatchOutcome::Answer(op(&mut guard))
        }
        None => DispatchOutcome::Drop,
    }
}

async fn with_session_registering(
    registry: &Registry,
    subdomain: &str,
    client: char,
    domain: &str,
    now: u64,
    sub_dom: String,
    encoder: &dyn Encoder,
) -> DispatchOutcome {
    let session = match resolve_client(registry, subdomain, client, domain).await {
        Some(s) => s,
        None => return DispatchOutcome::Drop,
    };

    let (resp, server_id, should_register) = {
        let mut guard = session.lock().await;
        guard.touch(now);
        let was_needed = guard.register_for_server_needed;
        let resp = guard.request_data_header(&sub_dom, encoder);
        (resp, guard.server_id.clone(), was_needed && !guard.register_for_server_needed)
    };

    if should_register {
        registry.register_session_for_server(&server_id, session).await;
    }

    DispatchOutcome::Answer(resp)
}
