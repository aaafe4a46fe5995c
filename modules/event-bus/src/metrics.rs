//! Bus traffic counters

use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;

/// Process-wide bus counters. Cheap atomics, bumped on the emit path.
#[derive(Default)]
pub struct BusMetrics {
    emits: AtomicU64,
    deliveries: AtomicU64,
    subscribers_enrolled: AtomicU64,
    publishers_enrolled: AtomicU64,
    waits_completed: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub emits: u64,
    pub deliveries: u64,
    pub subscribers_enrolled: u64,
    pub publishers_enrolled: u64,
    pub waits_completed: u64,
}

impl BusMetrics {
    pub(crate) fn record_emit(&self) {
        self.emits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscriber_enrolled(&self) {
        self.subscribers_enrolled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publisher_enrolled(&self) {
        self.publishers_enrolled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait_completed(&self) {
        self.waits_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emits: self.emits.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscribers_enrolled: self.subscribers_enrolled.load(Ordering::Relaxed),
            publishers_enrolled: self.publishers_enrolled.load(Ordering::Relaxed),
            waits_completed: self.waits_completed.load(Ordering::Relaxed),
        }
    }
}

static METRICS: Lazy<BusMetrics> = Lazy::new(BusMetrics::default);

/// The process-wide counters.
pub fn global() -> &'static BusMetrics {
    &METRICS
}
