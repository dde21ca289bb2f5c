//! Transfer Engine (C6): producer-side `Write`/`Dump`/`Finish` and
//! consumer-side `Read`, plus `CanPause`, the producer's hint for whether it
//! is safe to block without risking an unbounded overflow backlog.
//!
//! Lock order throughout is the global one (§5): registry (already released
//! by the time these run), then `producer_lock`, then the target
//! `consumer_lock`. Nothing here ever sleeps while holding a lock; waits
//! always drop the consumer lock first.

use crate::entry::{ConsumerStatus, QueueEntry, LONG_TUPLE};
use crate::error::{Result, SqueueError};
use crate::invariants::{LockLevelGuard, LEVEL_CONSUMER, LEVEL_PRODUCER};
use crate::long_tuple;
use crate::sync::SyncBlock;

/// `Write(tuple)`: delivers one tuple to a single consumer slot.
///
/// Order of attempts, each preserving FIFO order for that consumer: first
/// opportunistically dump anything still backlogged in the overflow store
/// (a new tuple may never jump ahead of older spilled ones), then try a
/// direct write (fragmenting via the long-tuple protocol if the tuple can
/// never fit as a single record), and only fall back to appending to the
/// overflow store if the ring has no room right now.
///
/// Writing to a slot that is not `ACTIVE` is a deliberate silent no-op (see
/// `crate::error` for the rationale) - the consumer side has already moved
/// on and there is nothing to report.
pub fn write(entry: &QueueEntry, sync: &SyncBlock, slot_index: usize, payload: &[u8]) -> Result<()> {
    dump(entry, sync, slot_index);

    let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
    let mut slot = entry.consumers[slot_index].lock().unwrap();
    if slot.status != ConsumerStatus::Active {
        return Ok(());
    }

    let mut overflow = entry.overflow[slot_index].lock().unwrap();
    if !overflow.is_empty() {
        overflow.push(payload.to_vec());
        entry.metrics.record_spill();
        return Ok(());
    }

    let needs_fragmentation = 4 + payload.len() > slot.ring.len();
    if needs_fragmentation {
        if slot.free_bytes() == slot.ring.len() {
            long_tuple::push_start(&mut slot, payload);
            entry.metrics.record_long_tuple_fragment();
            entry.metrics.record_write();
            drop(slot);
            drop(overflow);
            sync.consumer_signals[slot_index].signal();
        } else {
            overflow.push(payload.to_vec());
            entry.metrics.record_spill();
        }
        return Ok(());
    }

    let required = 4 + payload.len();
    if required <= slot.free_bytes() {
        slot.push_tuple(payload);
        entry.metrics.record_write();
        drop(slot);
        drop(overflow);
        sync.consumer_signals[slot_index].signal();
    } else {
        overflow.push(payload.to_vec());
        entry.metrics.record_spill();
    }
    Ok(())
}

/// `Dump()`: opportunistically drains the overflow store back into the
/// ring, in order, for as long as there is room. Returns `true` if the
/// store ended up fully drained.
///
/// Uses the store's persistent bookmark/advancing cursors (see
/// [`crate::overflow::OverflowStore`]) so an early exit - the ring fills up
/// again partway through - leaves already-written items written and simply
/// resumes from there on the next call, rather than re-writing or losing
/// anything.
pub fn dump(entry: &QueueEntry, sync: &SyncBlock, slot_index: usize) -> bool {
    let mut drained_any = false;
    loop {
        let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
        let mut overflow = entry.overflow[slot_index].lock().unwrap();
        if overflow.is_empty() {
            overflow.trim_drained();
            if drained_any {
                entry.metrics.record_dump();
            }
            return true;
        }

        let mut slot = entry.consumers[slot_index].lock().unwrap();
        if slot.status != ConsumerStatus::Active {
            overflow.rewind_pass();
            return false;
        }

        if slot.pending_push.is_some() {
            if !slot.fragment_drained() {
                overflow.rewind_pass();
                return false;
            }
            let more = long_tuple::push_continue(&mut slot);
            entry.metrics.record_long_tuple_fragment();
            drop(slot);
            sync.consumer_signals[slot_index].signal();
            if more {
                overflow.rewind_pass();
                return false;
            }
            overflow.advance_written();
            entry.metrics.record_write();
            drained_any = true;
            continue;
        }

        let item = overflow.peek_advancing().expect("checked non-empty above").to_vec();
        let needs_fragmentation = 4 + item.len() > slot.ring.len();

        if needs_fragmentation {
            if slot.free_bytes() != slot.ring.len() {
                overflow.rewind_pass();
                return false;
            }
            let more = long_tuple::push_start(&mut slot, &item);
            entry.metrics.record_long_tuple_fragment();
            drop(slot);
            sync.consumer_signals[slot_index].signal();
            if more {
                // this item isn't fully written yet; next Dump call resumes
                // it via the `pending_push` branch above.
                return false;
            }
            overflow.advance_written();
            entry.metrics.record_write();
            drained_any = true;
            continue;
        }

        let required = 4 + item.len();
        if required > slot.free_bytes() {
            overflow.rewind_pass();
            return false;
        }
        slot.push_tuple(&item);
        overflow.advance_written();
        entry.metrics.record_write();
        drained_any = true;
        drop(slot);
        sync.consumer_signals[slot_index].signal();
    }
}

/// `CanPause()`: true if the producer may safely block (e.g. waiting on a
/// remote partner) without risking an unbounded overflow backlog for this
/// slot - i.e. the overflow store is currently empty.
pub fn can_pause(entry: &QueueEntry, slot_index: usize) -> bool {
    let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
    entry.overflow[slot_index].lock().unwrap().is_empty()
}

/// `Finish()`: the producer has no more tuples for this slot. Attempts to
/// drain any backlog still sitting in the overflow store first; only moves
/// `ACTIVE -> EOF` if that drain actually empties the store (otherwise the
/// slot is left `ACTIVE` with its overflow still pending, to be retried by
/// a later `Dump`/`UnBind` pass). Always wakes the consumer so a blocked
/// `Read` observes whatever changed.
pub fn finish(entry: &QueueEntry, sync: &SyncBlock, slot_index: usize) {
    let drained = dump(entry, sync, slot_index);

    let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
    let mut slot = entry.consumers[slot_index].lock().unwrap();
    if slot.status == ConsumerStatus::Active && drained {
        slot.status = ConsumerStatus::Eof;
    }
    drop(slot);
    sync.consumer_signals[slot_index].signal();
}

/// Outcome of a `Read` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A tuple was available.
    Tuple(Vec<u8>),
    /// The producer reached `EOF` and the ring is now fully drained; the
    /// slot has just been moved to `DONE`.
    Eof,
    /// `canwait` was false and nothing was immediately available.
    WouldBlock,
}

/// `Read(canwait)`: with `canwait = true`, blocks until a tuple is
/// available, the producer reaches `EOF` with nothing left queued
/// ([`ReadOutcome::Eof`]), or the producer failed (`ProducerFailed`). With
/// `canwait = false`, returns [`ReadOutcome::WouldBlock`] immediately
/// instead of blocking whenever the ring is empty and the producer is still
/// `ACTIVE`.
///
/// Transparently reassembles a long tuple by pulling each subsequent
/// fragment directly once the previous one drains - the consumer briefly
/// releases its own lock to take a shared `producer_lock` between fragments
/// so a producer failure becomes visible mid-stream, then reacquires the
/// consumer lock to pull the next fragment. This inner pull always blocks
/// regardless of `canwait`, matching the suspension points §5 lists.
pub fn read(entry: &QueueEntry, sync: &SyncBlock, slot_index: usize, canwait: bool) -> Result<ReadOutcome> {
    let mut assembled: Vec<u8> = Vec::new();

    loop {
        let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
        let mut slot = entry.consumers[slot_index].lock().unwrap();

        if slot.ntuples == LONG_TUPLE {
            let remaining_after = slot.pop_length();
            let frag_len = slot.write_pos - slot.read_pos;
            let mut buf = vec![0u8; frag_len];
            slot.read_pos = slot.ring.read_at(slot.read_pos, &mut buf);
            assembled.extend_from_slice(&buf);

            if remaining_after == 0 {
                slot.ntuples = 0;
                entry.metrics.record_read();
                return Ok(ReadOutcome::Tuple(assembled));
            }

            drop(slot);
            {
                let _lvl = LockLevelGuard::enter(LEVEL_PRODUCER);
                let _producer = entry.producer.read().unwrap();
            }
            let _lvl = LockLevelGuard::enter(LEVEL_CONSUMER);
            let mut slot = entry.consumers[slot_index].lock().unwrap();
            if slot.status == ConsumerStatus::Error {
                return Err(SqueueError::ProducerFailed {
                    name: entry.key.clone(),
                });
            }
            long_tuple::push_continue(&mut slot);
            entry.metrics.record_long_tuple_fragment();
            continue;
        }

        if slot.ntuples > 0 {
            let length = slot.pop_length();
            let payload = slot.pop_payload(length);
            entry.metrics.record_read();
            return Ok(ReadOutcome::Tuple(payload));
        }

        match slot.status {
            ConsumerStatus::Error => {
                return Err(SqueueError::ProducerFailed {
                    name: entry.key.clone(),
                })
            }
            ConsumerStatus::Eof => {
                slot.status = ConsumerStatus::Done;
                drop(slot);
                sync.producer_signal.signal();
                return Ok(ReadOutcome::Eof);
            }
            ConsumerStatus::Done => return Ok(ReadOutcome::Eof),
            ConsumerStatus::Active => {
                if !canwait {
                    return Ok(ReadOutcome::WouldBlock);
                }
                sync.consumer_signals[slot_index].reset();
                drop(slot);
                sync.producer_signal.signal();
                sync.consumer_signals[slot_index].wait();
            }
        }
    }
}
