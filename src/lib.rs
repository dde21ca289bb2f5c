//! SQueue - process-shared, zero-copy, multi-consumer tuple redistribution fabric.
//!
//! When a distributed query plan materializes a data-redistribution edge, one
//! worker process (the *producer*) generates tuples and one worker process per
//! remote destination node (the *consumer*) drains its own queue, forwarding
//! rows to the corresponding remote worker. This crate is the shared fabric
//! those workers use to hand tuples from the producer to each consumer without
//! copying them through the network stack more than once.
//!
//! # Key Features
//!
//! - Fixed-capacity shared region with one cyclic byte ring per consumer
//! - Hybrid lock + wakeup-signal coordination with a strict lock order
//!   (registry -> producer -> consumer) that the type system nudges callers
//!   towards respecting
//! - Spillover to a producer-local overflow store when a ring fills
//! - Long-tuple streaming for payloads larger than a single ring
//! - Late-binding and late-disconnection safe lifecycle management
//! - A cleanup hook that auto-tracks consumer binds and releases them on
//!   process exit, even if the process never calls `Release` itself
//!
//! # Example
//!
//! ```
//! use squeue_rs::{Squeue, SquashConfig};
//!
//! let squeue = Squeue::init(SquashConfig::new(64, 4, 1 << 20));
//! squeue.acquire("redistribute-1", 1, 0).unwrap();
//! ```

mod backoff;
mod cleanup;
mod config;
mod entry;
mod error;
mod invariants;
mod lifecycle;
mod long_tuple;
mod metrics;
mod overflow;
mod registry;
mod ring;
mod sync;
mod transfer;

pub use cleanup::{CleanupGuard, CleanupRegistry};
pub use config::SquashConfig;
pub use entry::ConsumerStatus;
pub use error::{Result, SqueueError};
pub use lifecycle::{BindRole, ConsumerHandle, MapEntry, ProducerHandle};
pub use metrics::MetricsSnapshot;
pub use overflow::OverflowStore;
pub use registry::Registry;
pub use ring::Ring;
pub use transfer::ReadOutcome;

use std::sync::Arc;

/// Top-level handle to one process-group's shared-queue fabric.
///
/// Created once per process (via [`Squeue::init`]) and cheaply cloned; every
/// clone shares the same underlying [`Registry`]. Every consumer bind is
/// tracked in a [`CleanupRegistry`], so [`Squeue::cleanup_guard`] (or an
/// explicit [`Squeue::run_cleanup_now`]) can release anything this process
/// forgot to release itself.
#[derive(Clone)]
pub struct Squeue {
    registry: Arc<Registry>,
    cleanup: Arc<CleanupRegistry>,
}

impl Squeue {
    /// Equivalent to the source system's `SquashInit`: allocates the registry
    /// hash table and the sync-block pool sized for `config`.
    pub fn init(config: SquashConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(config)),
            cleanup: Arc::new(CleanupRegistry::new()),
        }
    }

    /// `Acquire(name, nconsumers)`: ensures a queue entry for `name` exists,
    /// formatted for exactly `nconsumers` consumers, retrying a bounded
    /// number of times if a stale leftover entry for `self_node` is found.
    pub fn acquire(&self, name: &str, nconsumers: usize, self_node: i32) -> Result<()> {
        self.registry.acquire(name, nconsumers, self_node)?;
        Ok(())
    }

    /// `Bind(name, cons_nodes, dist_nodes)`: claims the producer or a consumer
    /// role on the queue, whichever is still unclaimed. A successful consumer
    /// bind is automatically tracked for cleanup (see [`Self::cleanup_guard`]).
    pub fn bind(
        &self,
        name: &str,
        self_pid: u32,
        self_node: i32,
        consumer_nodes: &[i32],
        distribution_nodes: &[i32],
    ) -> Result<BindRole> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| SqueueError::NoSuchQueue(name.to_string()))?;
        lifecycle::bind(
            &self.registry,
            &entry,
            self_pid,
            self_node,
            consumer_nodes,
            distribution_nodes,
            &self.cleanup,
        )
    }

    /// `Release(name)`: consumer-side finalizer, usable even without an open
    /// [`ConsumerHandle`] (e.g. from the process-exit cleanup hook).
    pub fn release(&self, name: &str, self_node: i32) -> Result<()> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| SqueueError::NoSuchQueue(name.to_string()))?;
        self.cleanup.untrack(name, self_node);
        lifecycle::release_by_node(&self.registry, &entry, self_node)
    }

    /// Returns an RAII guard that releases every queue this process bound to
    /// as a consumer and never explicitly released, when the guard is
    /// dropped (panic, early return, or normal process exit).
    pub fn cleanup_guard(&self) -> CleanupGuard {
        CleanupGuard::new(Arc::clone(&self.registry), Arc::clone(&self.cleanup))
    }

    /// Releases every still-tracked queue immediately, without waiting for a
    /// [`CleanupGuard`] to drop.
    pub fn run_cleanup_now(&self) -> Result<()> {
        cleanup::run_now(&self.registry, &self.cleanup)
    }

    /// `DisconnectConsumer(name)`: marks this node's slot `DONE`, discarding
    /// any bytes still queued for it. A no-op if the queue does not exist.
    pub fn disconnect_consumer(&self, name: &str, self_node: i32) {
        if let Some(entry) = self.registry.lookup(name) {
            lifecycle::disconnect_consumer(&self.registry, &entry, self_node);
        }
    }

    /// Number of live queues currently tracked by the registry.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// True if no queue is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.registry.len() == 0
    }
}
