use thiserror::Error;

/// Error taxonomy for the shared-queue fabric.
///
/// Every error here is surfaced to the caller; nothing is silently
/// swallowed. The silent policies documented on [`crate::transfer`]
/// (discarding writes to a non-`ACTIVE` slot, silently marking a
/// never-bound consumer `DONE`) are deliberate and are not errors.
#[derive(Debug, Error)]
pub enum SqueueError {
    /// The registry hash table is full at `Acquire` time.
    #[error("registry is full (capacity {capacity})")]
    OutOfQueues {
        /// Configured registry capacity.
        capacity: usize,
    },

    /// No free sync block remains in the pool at `Acquire` time.
    #[error("no free sync block in the pool (capacity {capacity})")]
    OutOfSync {
        /// Configured sync-pool capacity.
        capacity: usize,
    },

    /// `Acquire` could not dislodge a stale leftover entry within the
    /// bounded retry budget.
    #[error("queue {name:?} looked stale after {attempts} retries")]
    StaleQueueTimeout {
        /// Queue name.
        name: String,
        /// Number of retries attempted before giving up.
        attempts: u32,
    },

    /// `Bind` or another lookup found no entry for the given name.
    #[error("no queue named {0:?}")]
    NoSuchQueue(String),

    /// `Bind`'s consumer list disagrees with the queue's consumer set.
    #[error("consumer node set for queue {name:?} does not match the bound set")]
    MismatchedConsumers {
        /// Queue name.
        name: String,
    },

    /// A consumer observed `ERROR` status on its slot; always fatal to the
    /// consumer's current operation.
    #[error("producer reported failure on queue {name:?}")]
    ProducerFailed {
        /// Queue name.
        name: String,
    },

    /// An internal invariant was violated (e.g. registry remove did not
    /// return the expected entry). Treated as fatal for the process group.
    #[error("internal invariant violated: {0}")]
    Corruption(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SqueueError>;
