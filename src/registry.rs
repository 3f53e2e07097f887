//! Process-wide rendezvous table. Allocates client IDs, pairs controller
//! connections to implant sessions by `server_id`, caches stage payloads,
//! and is ticked by the timeout service. Every method locks one mutex
//! (`spec.md` §4.6).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{info, warn};
use tokio::sync::{oneshot, Mutex};

use crate::controller::connection::StageRequest;
use crate::session::Session;

const CLIENT_ID_ALPHABET: std::ops::RangeInclusive<char> = 'a'..='z';

pub type SharedSession = Arc<Mutex<Session>>;

struct Stager {
    data: Vec<u8>,
    ts: u64,
}

struct RegistryInner {
    id_pool: VecDeque<char>,
    client_map: HashMap<char, SharedSession>,
    servers: HashMap<String, VecDeque<SharedSession>>,
    stagers: HashMap<String, Stager>,
    waited_servers: HashMap<String, VecDeque<oneshot::Sender<SharedSession>>>,
    /// Controllers that finished READ_ID for a `server_id` and are still
    /// waiting on a session to register (spec §4.6: "a controller is
    /// subscribed"). Used to ask the first such controller to upload a
    /// stage when none is cached yet.
    stage_waiters: HashMap<String, VecDeque<Arc<StageRequest>>>,
    unregister_pending: Vec<char>,
}

impl RegistryInner {
    fn new() -> Self {
        Self {
            id_pool: CLIENT_ID_ALPHABET.collect(),
            client_map: HashMap::new(),
            servers: HashMap::new(),
            stagers: HashMap::new(),
            waited_servers: HashMap::new(),
            stage_waiters: HashMap::new(),
            unregister_pending: Vec::new(),
        }
    }
}

/// Process-wide singleton (spec §9: "model them as explicitly constructed
/// services"). Construct exactly one and thread it through every component
/// that needs rendezvous state; tests build a fresh instance each time.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::new()),
        }
    }

    /// Allocates a client ID from the 26-element pool. `None` on exhaustion.
    pub async fn allocate_client_id(&self) -> Option<char> {
        let mut inner = self.inner.lock().await;
        inner.id_pool.pop_front()
    }

    pub async fn insert_session(&self, client_id: char, session: SharedSession) {
        let mut inner = self.inner.lock().await;
        inner.client_map.insert(client_id, session);
    }

    pub async fn lookup_client(&self, client_id: char) -> Option<SharedSession> {
        let inner = self.inner.lock().await;
        inner.client_map.get(&client_id).cloned()
    }

    /// A session reached its first poll: either hand it straight to an
    /// already-subscribed controller (FIFO), or queue it under `server_id`.
    pub async fn register_session_for_server(&self, server_id: &str, session: SharedSession) {
        let waiter = {
            let mut inner = self.inner.lock().await;
            let queue = inner.waited_servers.entry(server_id.to_string()).or_default();
            queue.pop_front()
        };
        match waiter {
            Some(tx) => {
                if tx.send(session).is_err() {
                    warn!("controller waiting for server_id {} went away before pairing", server_id);
                }
            }
            None => {
                let mut inner = self.inner.lock().await;
                inner.servers.entry(server_id.to_string()).or_default().push_back(session);
            }
        }
    }

    /// A controller finished READ_ID for `server_id`: pair immediately with
    /// a queued session if one exists, else return a future that resolves
    /// once one registers.
    pub async fn pair_or_subscribe(&self, server_id: &str) -> Result<SharedSession, oneshot::Receiver<SharedSession>> {
        let mut inner = self.inner.lock().await;
        if let Some(queue) = inner.servers.get_mut(server_id) {
            if let Some(session) = queue.pop_front() {
                return Ok(session);
            }
        }
        let (tx, rx) = oneshot::channel();
        inner.waited_servers.entry(server_id.to_string()).or_default().push_back(tx);
        Err(rx)
    }

    pub async fn cache_stage(&self, server_id: &str, data: Vec<u8>, now: u64) {
        let mut inner = self.inner.lock().await;
        inner.stagers.insert(server_id.to_string(), Stager { data, ts: now });
    }

    /// Registers `req` as a subscribed controller for `server_id` that can
    /// be asked to upload a stage (spec §4.6). Called once a controller's
    /// READ_ID finds no session waiting and it starts waiting itself.
    pub async fn subscribe_stage_waiter(&self, server_id: &str, req: Arc<StageRequest>) {
        let mut inner = self.inner.lock().await;
        inner.stage_waiters.entry(server_id.to_string()).or_default().push_back(req);
    }

    /// A controller stopped being "subscribed" (paired with a session, or
    /// disconnected) and should no longer be asked to upload a stage.
    pub async fn unsubscribe_stage_waiter(&self, server_id: &str, req: &Arc<StageRequest>) {
        let mut inner = self.inner.lock().await;
        if let Some(queue) = inner.stage_waiters.get_mut(server_id) {
            queue.retain(|r| !Arc::ptr_eq(r, req));
        }
    }

    /// Returns the cached stage for `server_id`. If none is cached yet,
    /// asks the first subscribed controller to upload one (spec §4.6:
    /// "asks the first subscribed controller to upload a stage") and
    /// meanwhile returns an empty default.
    pub async fn stage_for(&self, server_id: &str) -> Vec<u8> {
        let inner = self.inner.lock().await;
        if let Some(stager) = inner.stagers.get(server_id) {
            return stager.data.clone();
        }
        if let Some(waiter) = inner.stage_waiters.get(server_id).and_then(|q| q.front()) {
            waiter.request();
        }
        Vec::new()
    }

    /// Stage unregistration: marks `client_id` for removal once its session
    /// reports idle (spec §4.6: two-phase unregister).
    pub async fn unregister_client_pending(&self, client_id: char) {
        let mut inner = self.inner.lock().await;
        inner.unregister_pending.push(client_id);
    }

    pub async fn unregister_client_now(&self, client_id: char) {
        let mut inner = self.inner.lock().await;
        inner.client_map.remove(&client_id);
        inner.id_pool.push_back(client_id);
    }

    /// Drains `unregister_pending`, reclaiming any session that has become
    /// idle; called by the timeout sweep (spec §4.7).
    pub async fn drain_pending_unregistrations(&self) {
        let mut inner = self.inner.lock().await;
        let mut still_pending = Vec::new();
        let pending = std::mem::take(&mut inner.unregister_pending);
        for client_id in pending {
            let idle = match inner.client_map.get(&client_id) {
                Some(session) => session.try_lock().map(|s| s.is_idle()).unwrap_or(false),
                None => true,
            };
            if idle {
                inner.client_map.remove(&client_id);
                inner.id_pool.push_back(client_id);
                info!("reclaimed idle client id {}", client_id);
            } else {
                still_pending.push(client_id);
            }
        }
        inner.unregister_pending = still_pending;
    }

    /// Timeout sweep entry point: returns client ids whose session has been
    /// inactive for `|now - ts| >= timeout_secs` so the caller can notify
    /// their paired controller and reclaim the id.
    pub async fn sweep_expired(&self, now: u64, timeout_secs: u64) -> Vec<(char, SharedSession)> {
        let inner = self.inner.lock().await;
        let mut expired = Vec::new();
        for (id, session) in inner.client_map.iter() {
            if let Ok(guard) = session.try_lock() {
                if now.saturating_sub(guard.ts) >= timeout_secs || guard.ts.saturating_sub(now) >= timeout_secs {
                    expired.push((*id, session.clone()));
                }
            }
        }
        expired
    }

    pub async fn remove_from_servers_queue(&self, server_id: &str, client_id: char) {
        let mut inner = self.inner.lock().await;
        if let Some(queue) = inner.servers.get_mut(server_id) {
            queue.retain(|s| {
                s.try_lock().map(|g| g.client_id != client_id).unwrap_or(true)
            });
        }
    }

    pub async fn evict_stale_stagers(&self, now: u64, timeout_secs: u64) {
        let mut inner = self.inner.lock().await;
        inner
            .stagers
            .retain(|_, stager| now.saturating_sub(stager.ts) < timeout_secs);
    }

    /// One timeout-service tick (spec §4.7): reclaims inactive sessions,
    /// tearing down their paired controller connection and returning their
    /// id to the pool; evicts stale unsubscribed stagers; drains pending
    /// unregistrations whose session has since gone idle.
    pub async fn run_timeout_tick(&self, now: u64, session_timeout_secs: u64, stager_timeout_secs: u64) {
        for (client_id, session) in self.sweep_expired(now, session_timeout_secs).await {
            let server_id = {
                let mut guard = session.lock().await;
                let server_id = guard.server_id.clone();
                // Closes the paired controller connection outright (spec
                // §4.7/§9: the original tears the socket down on timeout,
                // not just pokes it) rather than merely waking its writer.
                if let Some(handle) = guard.controller_handle() {
                    handle.close();
                }
                guard.unpair();
                server_id
            };
            self.remove_from_servers_queue(&server_id, client_id).await;
            self.unregister_client_now(client_id).await;
            warn!("session {} ({}) timed out and was reclaimed", client_id, server_id);
        }

        self.evict_stale_stagers(now, stager_timeout_secs).await;
        self.drain_pending_unregistrations().await;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_client_id_is_unique_until_exhausted() {
        let reg = Registry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..26 {
            let id = reg.allocate_client_id().await.unwrap();
            assert!(seen.insert(id));
        }
        assert!(reg.allocate_client_id().await.is_none());
    }

    #[tokio::test]
    async fn unregister_returns_id_to_pool() {
        let reg = Registry::new();
        let id = reg.allocate_client_id().await.unwrap();
        reg.unregister_client_now(id).await;
        let reused = reg.allocate_client_id().await;
        assert!(reused.is_some());
    }

    #[tokio::test]
    async fn register_session_for_server_queues_without_waiter() {
        let reg = Registry::new();
        let session = Arc::new(Mutex::new(Session::new("d".into(), 'a', "XYZ".into(), 0)));
        reg.register_session_for_server("XYZ", session.clone()).await;
        let paired = reg.pair_or_subscribe("XYZ").await;
        assert!(paired.is_ok());
    }

    #[tokio::test]
    async fn rendezvous_is_fifo_for_waiting_controllers() {
        let reg = Registry::new();
        // two controllers subscribe first
        let rx1 = reg.pair_or_subscribe("XYZ").await.unwrap_err();
        let rx2 = reg.pair_or_subscribe("XYZ").await.unwrap_err();

        let s1 = Arc::new(Mutex::new(Session::new("d".into(), 'a', "XYZ".into(), 0)));
        let s2 = Arc::new(Mutex::new(Session::new("d".into(), 'b', "XYZ".into(), 0)));
        reg.register_session_for_server("XYZ", s1.clone()).await;
        reg.register_session_for_server("XYZ", s2.clone()).await;

        let paired1 = rx1.await.unwrap();
        let paired2 = rx2.await.unwrap();
        assert_eq!(paired1.lock().await.client_id, 'a');
        assert_eq!(paired2.lock().await.client_id, 'b');
    }
}
