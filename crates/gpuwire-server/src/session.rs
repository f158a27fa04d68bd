use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lifecycle of one server session. Termination is one-way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Terminated { reason: String },
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

/// Per-session counters, updated as records are replayed.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    pub batches_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub records_replayed: AtomicU64,
    pub backend_errors: AtomicU64,
    pub events_sent: AtomicU64,
    pub objects_released: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub batches_received: u64,
    pub bytes_received: u64,
    pub records_replayed: u64,
    pub backend_errors: u64,
    pub events_sent: u64,
    pub objects_released: u64,
}

impl SessionMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            records_replayed: self.records_replayed.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            objects_released: self.objects_released.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}
