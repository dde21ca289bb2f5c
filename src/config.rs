/// Process-group-wide sizing for the shared-queue fabric.
///
/// Mirrors the source system's `SquashInit(num_queues, max_nodes,
/// region_bytes)`: `num_queues` sizes the registry hash table and the sync
/// pool, `max_nodes` bounds how many destination nodes (one producer plus up
/// to `max_nodes - 1` consumers) a single queue can serve, and `region_bytes`
/// is the overall shared-region budget each queue's rings are carved out of.
#[derive(Debug, Clone, Copy)]
pub struct SquashConfig {
    /// Registry hash-table capacity (and sync-pool size).
    pub num_queues: usize,
    /// Maximum nodes per queue, including the producer's own node.
    pub max_nodes: usize,
    /// Total shared-region budget in bytes, amortized across `num_queues`.
    pub region_bytes: usize,
}

impl SquashConfig {
    /// Creates a new configuration.
    ///
    /// # Panics
    ///
    /// Panics if `num_queues` or `region_bytes` is zero, or if `max_nodes` is
    /// less than 2 (a queue needs at least a producer and one consumer).
    pub const fn new(num_queues: usize, max_nodes: usize, region_bytes: usize) -> Self {
        assert!(num_queues > 0, "num_queues must be > 0");
        assert!(
            max_nodes >= 2,
            "max_nodes must allow at least a producer and one consumer"
        );
        assert!(region_bytes > 0, "region_bytes must be > 0");

        Self {
            num_queues,
            max_nodes,
            region_bytes,
        }
    }

    /// Maximum consumers a single queue can hold (`max_nodes - 1`).
    #[inline]
    pub const fn max_consumers(&self) -> usize {
        self.max_nodes - 1
    }

    /// Fixed per-queue bookkeeping overhead for `nconsumers` consumer slots
    /// (name, producer identity, and one slot header each), modeling the
    /// source system's `header_size(max_nodes - 1)`.
    #[inline]
    pub fn header_bytes(&self, nconsumers: usize) -> usize {
        const QUEUE_NAME_MAX: usize = 64;
        const SLOT_HEADER_BYTES: usize = 32;
        QUEUE_NAME_MAX + nconsumers * SLOT_HEADER_BYTES
    }

    /// Byte capacity of each consumer ring for a queue with `nconsumers`
    /// consumers: `(region_bytes / num_queues - header_bytes) / nconsumers`.
    pub fn ring_bytes(&self, nconsumers: usize) -> usize {
        let nconsumers = nconsumers.max(1);
        let per_queue = self.region_bytes / self.num_queues;
        let header = self.header_bytes(nconsumers);
        per_queue.saturating_sub(header) / nconsumers
    }
}

impl Default for SquashConfig {
    fn default() -> Self {
        Self::new(64, 8, 64 * 1024 * 1024)
    }
}
