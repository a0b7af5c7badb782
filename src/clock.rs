// Clock synchronization against the auction server.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tracing::debug;

/// Estimated offset between local and authoritative time.
///
/// `authoritative_now = local_now + offset`. The offset is recomputed from
/// scratch on every `SERVER_TIME` sample (the server re-sends one after each
/// reconnect), so the single most recent sample always wins; there is no
/// smoothing or averaging. Before the first sample arrives the offset is
/// zero and `now_ms` degrades to local time.
///
/// Reads are many (one per countdown tick), writes are one (the
/// reconciliation task), so the offset lives in an atomic rather than behind
/// a lock.
#[derive(Debug, Default)]
pub struct ClockSync {
    offset_ms: AtomicI64,
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Current authoritative-time estimate as epoch milliseconds.
    pub fn now_ms(&self) -> i64 {
        local_now_ms() + self.offset_ms()
    }

    /// The current offset estimate in milliseconds.
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Recompute the offset from a server clock sample, replacing any prior
    /// estimate.
    pub fn apply_sample(&self, server_time_ms: i64) {
        self.apply_sample_at(server_time_ms, local_now_ms());
    }

    fn apply_sample_at(&self, server_time_ms: i64, local_ms: i64) {
        let offset = server_time_ms - local_ms;
        self.offset_ms.store(offset, Ordering::Release);
        debug!("time synced, offset {offset}ms");
    }
}

fn local_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
