//! Domain Metrics
//!
//! Counters owned by the domain instance, updated with relaxed atomics on
//! the routing and lifecycle paths.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one domain.
#[derive(Debug, Default)]
pub struct DomainMetrics {
    pub messages_routed: AtomicU64,
    pub messages_delivered: AtomicU64,
    pub messages_forwarded: AtomicU64,
    pub replies_matched: AtomicU64,
    pub late_replies_discarded: AtomicU64,
    pub delivery_failures: AtomicU64,
    pub timeouts: AtomicU64,
    pub cells_registered: AtomicU64,
    pub cells_killed: AtomicU64,
}

impl DomainMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time snapshot.
    pub fn snapshot(&self) -> DomainStats {
        DomainStats {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_forwarded: self.messages_forwarded.load(Ordering::Relaxed),
            replies_matched: self.replies_matched.load(Ordering::Relaxed),
            late_replies_discarded: self.late_replies_discarded.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cells_registered: self.cells_registered.load(Ordering::Relaxed),
            cells_killed: self.cells_killed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`DomainMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainStats {
    pub messages_routed: u64,
    pub messages_delivered: u64,
    pub messages_forwarded: u64,
    pub replies_matched: u64,
    pub late_replies_discarded: u64,
    pub delivery_failures: u64,
    pub timeouts: u64,
    pub cells_registered: u64,
    pub cells_killed: u64,
}
