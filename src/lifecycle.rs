//! Lifecycle Manager (C5): `Bind`, `Release`, `DisconnectConsumer`, and
//! `UnBind`, plus the producer/consumer handles returned by `Bind`.
//!
//! `Bind` is called by every party that wants to use a queue after
//! `Acquire`: exactly one caller binds as the producer, and up to
//! `nconsumers` others each bind as a consumer for one destination node.
//! Which role a caller gets is determined purely by whether its own node id
//! appears in the consumer list it was invoked with.

use crate::cleanup::CleanupRegistry;
use crate::entry::{ConsumerStatus, QueueEntry};
use crate::error::{Result, SqueueError};
use crate::invariants::{LockLevelGuard, LEVEL_CONSUMER, LEVEL_PRODUCER, LEVEL_REGISTRY};
use crate::registry::Registry;
use crate::transfer::{self, ReadOutcome};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Where one destination node's tuples should go, from a bound producer's
/// point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEntry {
    /// The destination is the producer's own node; nothing is routed here.
    SelfNode,
    /// No consumer slot exists for this destination.
    None,
    /// Destination maps to this consumer slot index.
    Slot(usize),
}

/// The role a successful `Bind` returns.
pub enum BindRole {
    /// Caller is the queue's single producer.
    Producer(ProducerHandle),
    /// Caller is one of the queue's consumers.
    Consumer(ConsumerHandle),
}

/// `Bind(name, consumer_nodes, distribution_nodes)`: claims the producer or
/// a consumer role on `name`, depending on whether `self_node` appears in
/// `consumer_nodes`.
pub fn bind(
    registry: &Arc<Registry>,
    entry: &Arc<QueueEntry>,
    self_pid: u32,
    self_node: i32,
    consumer_nodes: &[i32],
    distribution_nodes: &[i32],
    cleanup: &Arc<CleanupRegistry>,
) -> Result<BindRole> {
    if consumer_nodes.contains(&self_node) {
        bind_consumer(registry, entry, self_pid, self_node, consumer_nodes, cleanup).map(BindRole::Consumer)
    } else {
        bind_producer(
            registry,
            entry,
            self_pid,
            self_node,
            consumer_nodes,
            distribution_nodes,
        )
        .map(BindRole::Producer)
    }
}

fn bind_producer(
    registry: &Arc<Registry>,
    entry: &Arc<QueueEntry>,
    self_pid: u32,
    self_node: i32,
    consumer_nodes: &[i32],
    distribution_nodes: &[i32],
) -> Result<ProducerHandle> {
    let _lvl = LockLevelGuard::enter(LEVEL_PRODUCER);
    let mut producer = entry.producer.write().unwrap();
    if producer.pid != 0 && producer.pid != self_pid {
        return Err(SqueueError::MismatchedConsumers {
            name: entry.key.clone(),
        });
    }
    producer.pid = self_pid;
    producer.node = self_node;
    drop(producer);

    let targets = distribution_nodes
        .iter()
        .map(|&node| {
            let mapping = if node == self_node {
                MapEntry::SelfNode
            } else if let Some(slot) = consumer_nodes.iter().position(|&n| n == node) {
                MapEntry::Slot(slot)
            } else {
                MapEntry::None
            };
            (node, mapping)
        })
        .collect();

    tracing::debug!(queue = entry.key, node = self_node, "bound as producer");
    Ok(ProducerHandle {
        registry: Arc::clone(registry),
        entry: Arc::clone(entry),
        self_node,
        targets,
    })
}

fn bind_consumer(
    registry: &Arc<Registry>,
    entry: &Arc<QueueEntry>,
    self_pid: u32,
    self_node: i32,
    consumer_nodes: &[i32],
    cleanup: &Arc<CleanupRegistry>,
) -> Result<ConsumerHandle> {
    let slot_index = consumer_nodes
        .iter()
        .position(|&n| n == self_node)
        .filter(|&idx| idx < entry.nconsumers())
        .ok_or_else(|| SqueueError::MismatchedConsumers {
            name: entry.key.clone(),
        })?;

    let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
    let mut slot = entry.consumers[slot_index].lock().unwrap();
    if slot.status == ConsumerStatus::Error || slot.status == ConsumerStatus::Done {
        // The slot already belongs to a prior, now-dead occupant of this
        // node - the producer reported failure (or finalized it) before we
        // ever got here. Finalize it and surface that to the caller rather
        // than pretending it is a plain node mismatch.
        slot.status = ConsumerStatus::Done;
        drop(slot);
        let sync = registry.sync_block(entry);
        sync.producer_signal.signal();
        return Err(SqueueError::ProducerFailed {
            name: entry.key.clone(),
        });
    }
    slot.pid = self_pid;
    slot.node = self_node;
    drop(slot);

    cleanup.track(entry, self_node);
    tracing::debug!(queue = entry.key, node = self_node, slot_index, "bound as consumer");
    Ok(ConsumerHandle {
        registry: Arc::clone(registry),
        entry: Arc::clone(entry),
        self_node,
        slot_index,
        cleanup: Arc::clone(cleanup),
    })
}

/// A bound producer's view of its queue: one [`MapEntry`] per destination
/// node it was configured to distribute to.
pub struct ProducerHandle {
    registry: Arc<Registry>,
    entry: Arc<QueueEntry>,
    self_node: i32,
    targets: Vec<(i32, MapEntry)>,
}

impl ProducerHandle {
    fn slot_for(&self, dest_node: i32) -> Result<usize> {
        match self.targets.iter().find(|(node, _)| *node == dest_node) {
            Some((_, MapEntry::Slot(idx))) => Ok(*idx),
            Some((_, MapEntry::SelfNode)) | Some((_, MapEntry::None)) | None => {
                Err(SqueueError::NoSuchQueue(format!(
                    "{}: no consumer routed for node {dest_node}",
                    self.entry.key
                )))
            }
        }
    }

    /// `Write(dest_node, tuple)`.
    pub fn write(&self, dest_node: i32, payload: &[u8]) -> Result<()> {
        let slot = self.slot_for(dest_node)?;
        let sync = self.registry.sync_block(&self.entry);
        transfer::write(&self.entry, sync, slot, payload)
    }

    /// `Finish(dest_node)`.
    pub fn finish(&self, dest_node: i32) -> Result<()> {
        let slot = self.slot_for(dest_node)?;
        let sync = self.registry.sync_block(&self.entry);
        transfer::finish(&self.entry, sync, slot);
        Ok(())
    }

    /// `Dump(dest_node)`.
    pub fn dump(&self, dest_node: i32) -> Result<bool> {
        let slot = self.slot_for(dest_node)?;
        let sync = self.registry.sync_block(&self.entry);
        Ok(transfer::dump(&self.entry, sync, slot))
    }

    /// `CanPause(dest_node)`.
    pub fn can_pause(&self, dest_node: i32) -> Result<bool> {
        let slot = self.slot_for(dest_node)?;
        Ok(transfer::can_pause(&self.entry, slot))
    }

    /// `DisconnectConsumer(dest_node)`: forces the named destination's slot
    /// straight to `DONE`, discarding anything still queued for it, and
    /// wakes any blocked `Read`.
    pub fn disconnect_consumer(&self, dest_node: i32) {
        let Ok(slot) = self.slot_for(dest_node) else {
            return;
        };
        let sync = self.registry.sync_block(&self.entry);
        disconnect_slot(&self.entry, sync, slot);
    }

    /// `UnBind(failed=false)`: waits for every consumer to reach `DONE`
    /// (auto-finalizing destinations nobody ever bound to), then drops this
    /// producer's reference on the queue.
    pub fn unbind(self) -> Result<()> {
        unbind(&self.registry, &self.entry, self.self_node, false)
    }

    /// `UnBind(failed=true)`: the producer is giving up because of its own
    /// failure, not a normal end-of-stream. Every still-`ACTIVE` consumer is
    /// moved straight to `ERROR` (rather than `EOF`) and woken, so a blocked
    /// `Read` observes `ProducerFailed` instead of waiting for tuples that
    /// will never arrive.
    pub fn unbind_failed(self) -> Result<()> {
        unbind(&self.registry, &self.entry, self.self_node, true)
    }
}

/// A bound consumer's view of its queue.
pub struct ConsumerHandle {
    registry: Arc<Registry>,
    entry: Arc<QueueEntry>,
    self_node: i32,
    slot_index: usize,
    cleanup: Arc<CleanupRegistry>,
}

impl ConsumerHandle {
    /// `Read(canwait=true)`: blocks until a tuple, EOF, or a producer
    /// failure.
    pub fn read(&self) -> Result<Option<Vec<u8>>> {
        let sync = self.registry.sync_block(&self.entry);
        match transfer::read(&self.entry, sync, self.slot_index, true)? {
            ReadOutcome::Tuple(payload) => Ok(Some(payload)),
            ReadOutcome::Eof => Ok(None),
            ReadOutcome::WouldBlock => unreachable!("canwait=true never returns WouldBlock"),
        }
    }

    /// `Read(canwait=false)`: returns immediately instead of blocking when
    /// nothing is queued yet.
    pub fn try_read(&self) -> Result<ReadOutcome> {
        let sync = self.registry.sync_block(&self.entry);
        transfer::read(&self.entry, sync, self.slot_index, false)
    }

    /// `Release()`: marks this consumer `DONE` and drops this consumer's
    /// reference on the queue.
    pub fn release(self) -> Result<()> {
        self.cleanup.untrack(&self.entry.key, self.self_node);
        release_by_node(&self.registry, &self.entry, self.self_node)
    }
}

/// Forces a slot straight to `DONE`, discarding whatever is still queued -
/// the remote node told us it will never read again, which is not a failure,
/// just an early, self-reported finalization.
fn disconnect_slot(entry: &QueueEntry, sync: &crate::sync::SyncBlock, slot_index: usize) {
    let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
    let mut slot = entry.consumers[slot_index].lock().unwrap();
    if slot.status != ConsumerStatus::Done {
        slot.status = ConsumerStatus::Done;
        slot.ntuples = 0;
        slot.read_pos = 0;
        slot.write_pos = 0;
        drop(slot);
        sync.consumer_signals[slot_index].signal();
    }
}

/// `Release()`: marks every slot bound to `self_node` as `DONE`, wakes the
/// producer (which may be waiting in `UnBind`), and drops this party's
/// reference on the queue.
pub fn release_by_node(registry: &Arc<Registry>, entry: &Arc<QueueEntry>, self_node: i32) -> Result<()> {
    let sync = registry.sync_block(entry);
    {
        let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
        for slot in &entry.consumers {
            let mut slot = slot.lock().unwrap();
            if slot.node == self_node {
                slot.status = ConsumerStatus::Done;
            }
        }
    }
    sync.producer_signal.signal();
    drop_reference(registry, entry)
}

/// `DisconnectConsumer()`: public entry point used by
/// [`crate::Squeue::disconnect_consumer`] when the caller only has a queue
/// name, not a live [`ProducerHandle`].
pub fn disconnect_consumer(registry: &Arc<Registry>, entry: &Arc<QueueEntry>, self_node: i32) {
    let Some(slot_index) = entry
        .consumers
        .iter()
        .position(|slot| slot.lock().unwrap().node == self_node)
    else {
        return;
    };
    let sync = registry.sync_block(entry);
    disconnect_slot(entry, sync, slot_index);
}

/// Forces a never-bound slot (`node == -1`) straight to `DONE`; nobody will
/// ever read from or release it otherwise.
fn reset_not_connected(slot: &mut crate::entry::ConsumerSlot) {
    slot.status = ConsumerStatus::Done;
}

/// `UnBind(failed)`: the producer's final teardown. Every destination the
/// producer never saw a consumer bind for is auto-finalized immediately;
/// every destination still awaiting its consumer's `Release` is waited on,
/// bounded, via the sync block's `producer_signal`. When `failed` is true,
/// still-`ACTIVE` slots move to `ERROR` instead of `EOF`, so a blocked
/// reader sees `ProducerFailed` rather than a normal end-of-stream.
pub fn unbind(registry: &Arc<Registry>, entry: &Arc<QueueEntry>, self_node: i32, failed: bool) -> Result<()> {
    let sync = registry.sync_block(entry);
    let mut retries = crate::backoff::RetryBudget::new(10, Duration::from_secs(1));

    loop {
        let mut all_done = true;
        {
            let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
            for (index, slot) in entry.consumers.iter().enumerate() {
                let mut slot = slot.lock().unwrap();
                match slot.status {
                    ConsumerStatus::Done => {}
                    _ if slot.node == -1 => reset_not_connected(&mut slot),
                    ConsumerStatus::Active => {
                        slot.status = if failed {
                            ConsumerStatus::Error
                        } else {
                            ConsumerStatus::Eof
                        };
                        all_done = false;
                        drop(slot);
                        sync.consumer_signals[index].signal();
                    }
                    ConsumerStatus::Eof | ConsumerStatus::Error => all_done = false,
                }
            }
        }

        if all_done {
            break;
        }
        if retries.is_exhausted() {
            return Err(SqueueError::StaleQueueTimeout {
                name: entry.key.clone(),
                attempts: retries.attempts(),
            });
        }
        sync.producer_signal.wait_timeout(Duration::from_millis(50));
        retries.wait();
    }

    drop_reference(registry, entry)
}

fn drop_reference(registry: &Arc<Registry>, entry: &Arc<QueueEntry>) -> Result<()> {
    if entry.refcount.fetch_sub(1, Ordering::SeqCst) == 1 {
        let _lvl = LockLevelGuard::enter(LEVEL_REGISTRY);
        let mut table = registry.table_write();
        if entry.refcount.load(Ordering::SeqCst) == 0 {
            registry.remove_locked(&mut table, entry)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SquashConfig;

    fn acquired(num_queues: usize, nconsumers: usize) -> (Arc<Registry>, Arc<QueueEntry>) {
        let registry = Arc::new(Registry::new(SquashConfig::new(num_queues, 8, 1 << 16)));
        let entry = registry.acquire("q", nconsumers, 0).unwrap();
        (registry, entry)
    }

    fn no_cleanup() -> Arc<CleanupRegistry> {
        Arc::new(CleanupRegistry::new())
    }

    #[test]
    fn producer_and_consumer_bind_and_transfer() {
        let (registry, entry) = acquired(4, 1);
        let cleanup = no_cleanup();
        let producer = match bind(&registry, &entry, 100, 0, &[1], &[1], &cleanup).unwrap() {
            BindRole::Producer(p) => p,
            BindRole::Consumer(_) => panic!("expected producer role"),
        };
        let consumer = match bind(&registry, &entry, 200, 1, &[1], &[1], &cleanup).unwrap() {
            BindRole::Consumer(c) => c,
            BindRole::Producer(_) => panic!("expected consumer role"),
        };

        producer.write(1, b"hi").unwrap();
        assert_eq!(consumer.read().unwrap(), Some(b"hi".to_vec()));

        producer.finish(1).unwrap();
        assert_eq!(consumer.read().unwrap(), None);
    }

    #[test]
    fn unbind_auto_finalizes_never_bound_destinations() {
        let (registry, entry) = acquired(4, 2);
        let cleanup = no_cleanup();
        let producer = match bind(&registry, &entry, 100, 0, &[1, 2], &[1, 2], &cleanup).unwrap() {
            BindRole::Producer(p) => p,
            BindRole::Consumer(_) => panic!("expected producer role"),
        };
        // node 2 never binds a consumer.
        producer.unbind().unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn release_wakes_unbind_and_drops_refcount() {
        let (registry, entry) = acquired(4, 1);
        let cleanup = no_cleanup();
        let producer = match bind(&registry, &entry, 100, 0, &[1], &[1], &cleanup).unwrap() {
            BindRole::Producer(p) => p,
            BindRole::Consumer(_) => panic!("expected producer role"),
        };
        let consumer = match bind(&registry, &entry, 200, 1, &[1], &[1], &cleanup).unwrap() {
            BindRole::Consumer(c) => c,
            BindRole::Producer(_) => panic!("expected consumer role"),
        };
        producer.finish(1).unwrap();
        consumer.release().unwrap();
        producer.unbind().unwrap();
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn binding_a_slot_left_error_by_a_prior_occupant_reports_producer_failed() {
        let (registry, entry) = acquired(4, 1);
        entry.consumers[0].lock().unwrap().status = ConsumerStatus::Error;
        let cleanup = no_cleanup();
        let err = bind_consumer(&registry, &entry, 200, 1, &[1], &cleanup).unwrap_err();
        assert!(matches!(err, SqueueError::ProducerFailed { .. }));
        assert_eq!(entry.consumers[0].lock().unwrap().status, ConsumerStatus::Done);
    }

    #[test]
    fn binding_a_consumer_tracks_it_for_cleanup_and_release_untracks_it() {
        let (registry, entry) = acquired(4, 1);
        let cleanup = no_cleanup();
        let _producer = match bind(&registry, &entry, 100, 0, &[1], &[1], &cleanup).unwrap() {
            BindRole::Producer(p) => p,
            BindRole::Consumer(_) => panic!("expected producer role"),
        };
        let consumer = match bind(&registry, &entry, 200, 1, &[1], &[1], &cleanup).unwrap() {
            BindRole::Consumer(c) => c,
            BindRole::Producer(_) => panic!("expected consumer role"),
        };
        assert_eq!(cleanup.held_count(), 1);
        consumer.release().unwrap();
        assert_eq!(cleanup.held_count(), 0);
    }
}
