//! The controller listener. The original drives one OS thread through
//! `select()` plus a self-pipe; `dnsbridge` keeps the same shape — one
//! logical owner for "new connection" events, everything else woken rather
//! than polled — expressed with `tokio::select!` over `accept()` instead
//! (spec §4.5, §9: "keep HOW, replace WHAT").

use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpListener;

use crate::controller::connection::ControllerConnection;
use crate::registry::Registry;

pub struct ControllerReactor {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl ControllerReactor {
    pub async fn bind(addr: &str, registry: Arc<Registry>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("controller reactor listening on {}", addr);
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts controller connections until the process shuts down. Each
    /// accepted socket gets its own task running the READ_ID→STAGE→STATUS→
    /// TLV chain from `spec.md` §4.4; per-connection state lives entirely
    /// within that task or its paired `Session`'s own mutex, matching the
    /// "reactor thread is the sole owner of per-connection non-lock state"
    /// rule (spec §5) by construction rather than by explicit locking.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("controller connection accepted from {}", peer);
                    let conn = ControllerConnection::new(stream, self.registry.clone());
                    tokio::spawn(async move {
                        if let Err(e) = conn.run().await {
                            warn!("controller connection from {} closed: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("controller accept failed: {}", e);
                }
            }
        }
    }
}
