//! Optional metrics for monitoring queue traffic, aggregated per queue entry.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters updated from both the producer and consumer sides of one
/// queue.
#[derive(Debug, Default)]
pub struct Metrics {
    tuples_written: AtomicU64,
    tuples_read: AtomicU64,
    overflow_spills: AtomicU64,
    overflow_dumps: AtomicU64,
    long_tuple_fragments: AtomicU64,
}

impl Metrics {
    pub(crate) fn record_write(&self) {
        self.tuples_written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.tuples_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spill(&self) {
        self.overflow_spills.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dump(&self) {
        self.overflow_dumps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_long_tuple_fragment(&self) {
        self.long_tuple_fragments.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tuples_written: self.tuples_written.load(Ordering::Relaxed),
            tuples_read: self.tuples_read.load(Ordering::Relaxed),
            overflow_spills: self.overflow_spills.load(Ordering::Relaxed),
            overflow_dumps: self.overflow_dumps.load(Ordering::Relaxed),
            long_tuple_fragments: self.long_tuple_fragments.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a queue's [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Tuples successfully written directly into a ring.
    pub tuples_written: u64,
    /// Tuples successfully read out of a ring.
    pub tuples_read: u64,
    /// Tuples that had to spill into the producer-local overflow store.
    pub overflow_spills: u64,
    /// Successful `Dump` calls that moved overflow tuples into a ring.
    pub overflow_dumps: u64,
    /// Long-tuple fragments written by the producer.
    pub long_tuple_fragments: u64,
}
