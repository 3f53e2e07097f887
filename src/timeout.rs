//! A single repeating timer that fans tick events, carrying the current
//! UNIX time, out to one listener (`spec.md` §4.7). The original supports a
//! `set` of bound-method listeners; `dnsbridge` only ever needs one (the
//! registry sweep), so this is a thin wrapper over `tokio::time::interval`
//! rather than a general pub/sub list.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct TimeoutService {
    period: Duration,
}

impl TimeoutService {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Runs forever, invoking `on_tick` with the current UNIX time every
    /// `period`. Callers that need a one-shot listener should exit their
    /// future after the condition they're watching for clears.
    pub async fn run<F, Fut>(&self, mut on_tick: F)
    where
        F: FnMut(u64) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.period);
        loop {
            ticker.tick().await;
            on_tick(now_secs()).await;
        }
    }
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
