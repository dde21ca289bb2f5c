//! The data model: consumer slots and queue entries (C2).

use crate::ring::{self, Ring};
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

/// Sentinel `ntuples` value marking an in-progress long-tuple transfer.
pub const LONG_TUPLE: i64 = -1;

/// One consumer's state: `ACTIVE` (initial), `EOF` (producer has no more
/// tuples), `ERROR` (producer failed), `DONE` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// Accepting writes and reads; the initial state of every slot.
    Active,
    /// The producer finished and drained its overflow store for this slot;
    /// the consumer may still read whatever remains queued.
    Eof,
    /// The producer failed; any blocked or future read fails.
    Error,
    /// Terminal: the consumer has finished or been released.
    Done,
}

/// Bytes retained by the producer while mid-stream on a tuple larger than
/// one ring. Not part of the shared region; this is producer-local state
/// that happens to live alongside the slot it is producing into.
pub(crate) struct PendingLongTuple {
    pub(crate) payload: Vec<u8>,
    pub(crate) written: usize,
}

/// Per-destination-node consumer slot.
pub struct ConsumerSlot {
    /// OS process id of the bound consumer, or 0 if unbound.
    pub pid: u32,
    /// Destination cluster node id, or -1 if the slot is still unclaimed.
    pub node: i32,
    /// Current lifecycle state.
    pub status: ConsumerStatus,
    /// This consumer's dedicated cyclic ring.
    pub ring: Ring,
    /// Byte offset of the next record to read.
    pub read_pos: usize,
    /// Byte offset of the next record to write.
    pub write_pos: usize,
    /// Count of complete tuples queued, or [`LONG_TUPLE`] mid-stream.
    pub ntuples: i64,
    pub(crate) pending_push: Option<PendingLongTuple>,
}

impl ConsumerSlot {
    #[cfg(test)]
    pub(crate) fn for_test(ring_len: usize) -> Self {
        Self::new(ring_len)
    }

    fn new(ring_len: usize) -> Self {
        Self {
            pid: 0,
            node: -1,
            status: ConsumerStatus::Active,
            ring: Ring::new(ring_len),
            read_pos: 0,
            write_pos: 0,
            ntuples: 0,
            pending_push: None,
        }
    }

    /// Free bytes available for the producer to write without catching up
    /// to the reader (see [`ring::free_bytes`]).
    pub fn free_bytes(&self) -> usize {
        ring::free_bytes(self.ring.len(), self.read_pos, self.write_pos, self.ntuples)
    }

    /// True once the consumer has read every byte of the current long-tuple
    /// fragment. `free_bytes`'s empty/full formula is ambiguous at
    /// `read_pos == write_pos` for an ordinary ring, but in `LONG_TUPLE` mode
    /// there is exactly one writer state this can mean: fully drained.
    pub(crate) fn fragment_drained(&self) -> bool {
        self.read_pos == self.write_pos
    }

    /// Writes one complete `(len)(payload)` tuple record via the normal
    /// cyclic read/write cursors. Caller must have already checked
    /// `free_bytes() >= 4 + payload.len()`.
    pub(crate) fn push_tuple(&mut self, payload: &[u8]) {
        let header = (payload.len() as u32).to_ne_bytes();
        self.write_pos = self.ring.write_at(self.write_pos, &header);
        self.write_pos = self.ring.write_at(self.write_pos, payload);
        self.ntuples += 1;
    }

    /// Reads the 4-byte length prefix of the next record, advancing
    /// `read_pos`, without touching `ntuples`.
    pub(crate) fn pop_length(&mut self) -> usize {
        let mut header = [0u8; 4];
        self.read_pos = self.ring.read_at(self.read_pos, &mut header);
        u32::from_ne_bytes(header) as usize
    }

    /// Reads `length` payload bytes following a prefix already consumed by
    /// [`Self::pop_length`], advancing `read_pos` and decrementing `ntuples`.
    pub(crate) fn pop_payload(&mut self, length: usize) -> Vec<u8> {
        let mut payload = vec![0u8; length];
        self.read_pos = self.ring.read_at(self.read_pos, &mut payload);
        self.ntuples -= 1;
        payload
    }
}

/// Producer identity, guarded by the queue's `producer_lock`
/// (shared/exclusive `RwLock`).
#[derive(Debug, Default)]
pub struct ProducerState {
    /// OS process id of the bound producer, or 0 if none is bound yet.
    pub pid: u32,
    /// Remote cluster node of the bound producer, or -1 if unbound.
    pub node: i32,
}

impl ProducerState {
    fn new() -> Self {
        Self { pid: 0, node: -1 }
    }
}

/// One live redistribution edge.
///
/// `producer` is the `producer_lock` (an `RwLock`, taken shared by readers
/// detecting wakeups and exclusive for producer-side state transitions).
/// Each element of `consumers` doubles as that slot's `consumer_lock`: the
/// `Mutex` *is* the lock, and its contents are exactly the data the lock
/// protects.
pub struct QueueEntry {
    /// The queue name this entry is keyed by.
    pub key: String,
    pub(crate) producer: std::sync::RwLock<ProducerState>,
    pub(crate) consumers: Vec<Mutex<ConsumerSlot>>,
    /// One producer-local overflow spill store per consumer slot.
    pub(crate) overflow: Vec<Mutex<crate::overflow::OverflowStore>>,
    pub(crate) sync_index: usize,
    pub(crate) refcount: AtomicUsize,
    pub(crate) metrics: crate::metrics::Metrics,
}

impl QueueEntry {
    pub(crate) fn new(key: &str, nconsumers: usize, ring_len: usize, sync_index: usize) -> Self {
        let consumers = (0..nconsumers)
            .map(|_| Mutex::new(ConsumerSlot::new(ring_len)))
            .collect();
        let overflow = (0..nconsumers)
            .map(|_| Mutex::new(crate::overflow::OverflowStore::new()))
            .collect();
        Self {
            key: key.to_string(),
            producer: std::sync::RwLock::new(ProducerState::new()),
            consumers,
            overflow,
            sync_index,
            refcount: AtomicUsize::new(1),
            metrics: crate::metrics::Metrics::default(),
        }
    }

    /// Number of consumer slots this queue was formatted for.
    pub fn nconsumers(&self) -> usize {
        self.consumers.len()
    }

    /// A point-in-time snapshot of this queue's transfer metrics.
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }
}
