//! One controller TCP peer: READ_ID → optional STAGE → STATUS → TLV, driven
//! by generic length-prefixed reads (`spec.md` §4.4). Rust expresses the
//! "pluggable expected-length reader" (spec §9) as explicit async functions
//! over a state enum rather than the original's coroutine-shaped reader
//! classes — there is no implicit suspension, only `.await` points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::controller::ControllerHandle;
use crate::registry::{Registry, SharedSession};

const TLV_HEADER_LEN: usize = 32;
const XOR_KEY_LEN: usize = 4;
const PKT_LEN_OFFSET: usize = 24;

/// Shared with the registry so `get_stage_client_for_server` can ask this
/// connection to upload a stage payload before continuing (spec §4.6:
/// "asks the first subscribed controller to upload a stage").
pub struct StageRequest {
    requested: AtomicBool,
    wake: Notify,
}

impl StageRequest {
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

impl Default for StageRequest {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ControllerConnection {
    stream: TcpStream,
    registry: Arc<Registry>,
    handle: Arc<ControllerHandle>,
    stage_request: Arc<StageRequest>,
    server_id: String,
    session: Option<SharedSession>,
}

impl ControllerConnection {
    pub fn new(stream: TcpStream, registry: Arc<Registry>) -> Self {
        Self {
            stream,
            registry,
            handle: Arc::new(ControllerHandle::new()),
            stage_request: Arc::new(StageRequest::new()),
            server_id: String::new(),
            session: None,
        }
    }

    /// Drives this connection to completion. Runs until the peer closes, an
    /// I/O error occurs, or the registry's timeout sweep closes this
    /// connection's `ControllerHandle`; any of these mean "close connection,
    /// unpair session, leave session in the registry to time out" (spec
    /// §7d).
    ///
    /// READ_ID/STAGE/STATUS share the full-duplex stream (STATUS both reads
    /// a probe byte and writes a response byte); once in steady state the
    /// stream is split and the TLV reader races the server_queue writer in
    /// one `select!`, matching the reactor's "readers vs writers" split
    /// (spec §4.5) without needing raw `select(2)` on this socket. Racing
    /// them in the same task (rather than spawning the writer loose) means
    /// whichever side observes the close signal first tears down both: the
    /// loser's future is dropped, dropping its half of the split socket.
    pub async fn run(mut self) -> std::io::Result<()> {
        self.read_id().await?;

        if self.stage_request.take() {
            self.read_stage().await?;
        }

        self.status_handshake().await?;

        let session = self.session.clone();
        let handle = self.handle.clone();
        let (mut read_half, write_half) = self.stream.into_split();

        match session {
            Some(session) => {
                tokio::select! {
                    r = Self::tlv_loop(&mut read_half, &self.session, &self.server_id) => r,
                    r = Self::writer_loop(session, handle, write_half) => r,
                }
            }
            None => Self::tlv_loop(&mut read_half, &self.session, &self.server_id).await,
        }
    }

    async fn read_id(&mut self) -> std::io::Result<()> {
        let len = self.stream.read_u8().await? as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        self.server_id = String::from_utf8_lossy(&buf).to_string();
        info!("controller READ_ID: server_id={}", self.server_id);

        match self.registry.pair_or_subscribe(&self.server_id).await {
            Ok(session) => {
                self.pair(session).await;
            }
            Err(rx) => {
                debug!("controller for server_id {} waiting for an implant", self.server_id);
                self.registry.subscribe_stage_waiter(&self.server_id, self.stage_request.clone()).await;
                if let Ok(session) = rx.await {
                    self.registry.unsubscribe_stage_waiter(&self.server_id, &self.stage_request).await;
                    self.pair(session).await;
                }
            }
        }
        Ok(())
    }

    async fn pair(&mut self, session: SharedSession) {
        let weak = Arc::downgrade(&self.handle);
        session.lock().await.pair_with(weak);
        self.session = Some(session);
        info!("controller paired with implant for server_id={}", self.server_id);
    }

    async fn read_stage(&mut self) -> std::io::Result<()> {
        let len = self.stream.read_u32_le().await? as usize;
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        self.registry.cache_stage(&self.server_id, buf, now_secs()).await;
        Ok(())
    }

    async fn status_handshake(&mut self) -> std::io::Result<()> {
        let mut probe = [0u8; 1];
        self.stream.read_exact(&mut probe).await?;
        let paired = self.session.is_some();
        self.stream.write_all(&[if paired { 0x01 } else { 0x00 }]).await?;
        Ok(())
    }

    async fn tlv_loop(
        read_half: &mut tokio::net::tcp::OwnedReadHalf,
        session: &Option<SharedSession>,
        server_id: &str,
    ) -> std::io::Result<()> {
        loop {
            let mut header = [0u8; TLV_HEADER_LEN];
            read_half.read_exact(&mut header).await?;
            let key = &header[0..XOR_KEY_LEN];
            let mut len_bytes = [0u8; 4];
            for i in 0..4 {
                len_bytes[i] = header[PKT_LEN_OFFSET + i] ^ key[i % XOR_KEY_LEN];
            }
            let pkt_len = u32::from_be_bytes(len_bytes) as usize;

            let mut body = vec![0u8; pkt_len];
            read_half.read_exact(&mut body).await?;

            let mut frame = Vec::with_capacity(TLV_HEADER_LEN + pkt_len);
            frame.extend_from_slice(&header);
            frame.extend_from_slice(&body);

            if let Some(session) = session {
                let tx = session.lock().await.client_queue_sender();
                if tx.send(frame).await.is_err() {
                    warn!("client_queue for server_id {} closed", server_id);
                }
            } else {
                warn!("TLV frame received before pairing for server_id {}, dropping", server_id);
            }
        }
    }

    /// The write half of this connection: polls the paired session's
    /// `server_queue` and forwards whole frames (spec §4.4: "polls
    /// session.server_queue ... writes frames as whole TCP segments").
    pub async fn writer_loop(session: SharedSession, handle: Arc<ControllerHandle>, mut write_half: tokio::net::tcp::OwnedWriteHalf) -> std::io::Result<()> {
        loop {
            if handle.is_closed() {
                write_half.shutdown().await?;
                return Ok(());
            }

            let maybe_frame = {
                let mut guard = session.lock().await;
                guard.try_recv_server_frame()
            };
            match maybe_frame {
                Some(frame) => {
                    write_half.write_all(&frame).await?;
                }
                None => {
                    let _ = tokio::time::timeout(Duration::from_secs(2), handle.woken()).await;
                }
            }
        }
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
