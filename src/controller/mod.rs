//! The TCP half of the bridge: a non-blocking peer state machine
//! (`connection`) and the single-threaded-shaped reactor that drives many of
//! them concurrently (`reactor`), per `spec.md` §4.4/§4.5.

pub mod connection;
pub mod reactor;

pub use connection::ControllerConnection;
pub use reactor::ControllerReactor;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// The non-owning side of the Session↔controller pairing (spec §9:
/// "circular refs ... use weak back-references"). A `Session` holds a
/// `Weak<ControllerHandle>`; the `ControllerConnection` holds the `Arc` and
/// drops it on unpair/timeout, which is what actually breaks the cycle.
pub struct ControllerHandle {
    wake: Notify,
    closed: AtomicBool,
}

impl ControllerHandle {
    pub fn new() -> Self {
        Self {
            wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Called by a `Session` when it has enqueued a new uplink frame
    /// (`spec.md` §4.3: "poke controller via controller.polling()").
    pub fn notify_polling(&self) {
        self.wake.notify_one();
    }

    pub async fn woken(&self) {
        self.wake.notified().await;
    }

    /// Tears the connection down: wakes the writer loop so it can observe
    /// `is_closed()` and shut down the socket instead of polling forever
    /// (spec §4.7/§9: the original closes the controller's socket on
    /// timeout, it doesn't just poke it).
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for ControllerHandle {
    fn default() -> Self {
        Self::new()
    }
}
