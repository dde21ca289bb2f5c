//! Registry (C4): a name-keyed table of live queues, with the sync-block
//! pool they are rented from.
//!
//! The Registry lock is the outermost lock in the global order (registry ->
//! producer -> consumer, §5); every routine in [`crate::lifecycle`] that
//! needs to look up, create, or remove an entry takes it for the shortest
//! span that keeps the corresponding state transition atomic, as documented
//! per-routine there.

use crate::config::SquashConfig;
use crate::entry::QueueEntry;
use crate::error::{Result, SqueueError};
use crate::invariants::{LockLevelGuard, LEVEL_REGISTRY};
use crate::sync::{SyncBlock, SyncPool};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

type Table = HashMap<String, Arc<QueueEntry>>;

/// The process-group-wide registry and sync-block pool.
pub struct Registry {
    config: SquashConfig,
    sync_pool: SyncPool,
    table: RwLock<Table>,
}

impl Registry {
    /// Allocates a registry and sync pool sized per `config`. Equivalent to
    /// the source system's `SquashInit`.
    pub fn new(config: SquashConfig) -> Self {
        Self {
            sync_pool: SyncPool::new(config.num_queues, config.max_consumers()),
            table: RwLock::new(HashMap::with_capacity(config.num_queues)),
            config,
        }
    }

    /// The configuration this registry was built from.
    pub fn config(&self) -> SquashConfig {
        self.config
    }

    /// Number of live queues currently tracked.
    pub fn len(&self) -> usize {
        let _lvl = LockLevelGuard::enter(LEVEL_REGISTRY);
        self.table.read().unwrap().len()
    }

    /// `lookup(name)`: O(1) read under the registry lock in shared mode.
    pub fn lookup(&self, name: &str) -> Option<Arc<QueueEntry>> {
        let _lvl = LockLevelGuard::enter(LEVEL_REGISTRY);
        self.table.read().unwrap().get(name).cloned()
    }

    pub(crate) fn sync_block(&self, entry: &QueueEntry) -> &SyncBlock {
        self.sync_pool.get(entry.sync_index)
    }

    pub(crate) fn sync_pool(&self) -> &SyncPool {
        &self.sync_pool
    }

    pub(crate) fn table_write(&self) -> RwLockWriteGuard<'_, Table> {
        self.table.write().unwrap()
    }

    /// `Acquire(name, nconsumers)`: ensures an entry exists for `name`,
    /// formatted for `nconsumers` consumers, retrying up to 10 times (≈1ms
    /// apart) if an existing entry looks like a stale leftover for
    /// `self_node` from a prior execution still tearing down.
    ///
    /// The whole check-and-mutate sequence (lookup, staleness check,
    /// refcount bump or insert) runs under one exclusive registry-lock
    /// acquisition per attempt, matching §4.2.1's "take Registry lock
    /// exclusively ... release Registry lock" bracketing.
    pub fn acquire(&self, name: &str, nconsumers: usize, self_node: i32) -> Result<Arc<QueueEntry>> {
        let mut retries = crate::backoff::RetryBudget::stale_queue();

        loop {
            let outcome = self.try_acquire_once(name, nconsumers, self_node)?;
            match outcome {
                AcquireOutcome::Ready(entry) => return Ok(entry),
                AcquireOutcome::Stale => {
                    if retries.is_exhausted() {
                        return Err(SqueueError::StaleQueueTimeout {
                            name: name.to_string(),
                            attempts: retries.attempts(),
                        });
                    }
                    tracing::debug!(queue = name, attempt = retries.attempts(), "stale queue, retrying acquire");
                    retries.wait();
                }
            }
        }
    }

    fn try_acquire_once(
        &self,
        name: &str,
        nconsumers: usize,
        self_node: i32,
    ) -> Result<AcquireOutcome> {
        let _lvl = LockLevelGuard::enter(LEVEL_REGISTRY);
        let mut table = self.table.write().unwrap();

        if let Some(entry) = table.get(name) {
            let entry = Arc::clone(entry);
            let producer_pid = entry.producer.read().unwrap().pid;
            let stale = producer_pid != 0
                && entry.consumers.iter().any(|slot| {
                    let slot = slot.lock().unwrap();
                    slot.node == self_node && slot.status != crate::entry::ConsumerStatus::Done
                });

            if stale {
                return Ok(AcquireOutcome::Stale);
            }
            entry.refcount.fetch_add(1, Ordering::SeqCst);
            return Ok(AcquireOutcome::Ready(entry));
        }

        if table.len() >= self.config.num_queues {
            return Err(SqueueError::OutOfQueues {
                capacity: self.config.num_queues,
            });
        }
        let sync_index = self.sync_pool.rent().ok_or(SqueueError::OutOfSync {
            capacity: self.sync_pool.capacity(),
        })?;
        let ring_len = self.config.ring_bytes(nconsumers);
        let entry = Arc::new(QueueEntry::new(name, nconsumers, ring_len, sync_index));
        table.insert(name.to_string(), Arc::clone(&entry));
        tracing::debug!(queue = name, nconsumers, "created queue entry");
        Ok(AcquireOutcome::Ready(entry))
    }

    /// `remove(entry)`: exclusive registry lock, precondition `refcount ==
    /// 0`. Called with the write guard already held so callers that need to
    /// pair it with a refcount decrement (UnBind, Release) can do so
    /// atomically.
    pub(crate) fn remove_locked(&self, table: &mut Table, entry: &QueueEntry) -> Result<()> {
        match table.remove(&entry.key) {
            Some(_) => {
                self.sync_pool.release(entry.sync_index);
                tracing::debug!(queue = entry.key, "removed queue entry");
                Ok(())
            }
            None => Err(SqueueError::Corruption(format!(
                "registry remove did not find entry {:?}",
                entry.key
            ))),
        }
    }
}

enum AcquireOutcome {
    Ready(Arc<QueueEntry>),
    Stale,
}
