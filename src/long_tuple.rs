//! Long-tuple protocol (C7): a tuple whose encoded size exceeds one ring's
//! capacity is streamed across multiple ring-sized fragments instead of
//! being written as a single record.
//!
//! Each fragment occupies the *entire* ring: a 4-byte "bytes remaining after
//! this fragment" header at absolute offset 0, followed by payload filling
//! the rest of the ring. A fragment is pushed only once the previous one has
//! been fully drained by the consumer (`free_bytes() == ring.len()`), so
//! fragments always start at offset 0 rather than wherever the cyclic
//! cursors happen to sit - there is never more than one fragment resident at
//! a time, so there's nothing to wrap around.
//!
//! These functions only manipulate `ConsumerSlot` data; the wait/wake
//! handshake around each fragment boundary lives in [`crate::transfer`],
//! which is the only place lock ordering and signaling need to be
//! coordinated.

use crate::entry::{ConsumerSlot, PendingLongTuple, LONG_TUPLE};

/// Begins a long-tuple transfer: the ring must be completely empty. Writes
/// the first fragment and stashes the remainder (if any) as producer-local
/// state on the slot. Returns `true` if more fragments remain after this
/// one.
pub(crate) fn push_start(slot: &mut ConsumerSlot, payload: &[u8]) -> bool {
    debug_assert_eq!(slot.free_bytes(), slot.ring.len(), "push_start requires an empty ring");
    debug_assert!(slot.pending_push.is_none());

    slot.ntuples = LONG_TUPLE;
    write_fragment(slot, payload, 0)
}

/// Pushes the next fragment of an in-progress long tuple. The ring must
/// again be completely empty (the consumer has drained the previous
/// fragment). Returns `true` if more fragments remain after this one.
pub(crate) fn push_continue(slot: &mut ConsumerSlot) -> bool {
    debug_assert!(slot.fragment_drained(), "push_continue requires the prior fragment fully read");
    let pending = slot.pending_push.take().expect("push_continue with no pending fragment");
    write_fragment(slot, &pending.payload, pending.written)
}

fn write_fragment(slot: &mut ConsumerSlot, remaining_payload: &[u8], fragments_sent: usize) -> bool {
    let fragment_cap = slot.ring.len() - 4;
    let chunk = remaining_payload.len().min(fragment_cap);
    let remaining_after = remaining_payload.len() - chunk;

    let header = (remaining_after as u32).to_ne_bytes();
    slot.write_pos = slot.ring.write_at(0, &header);
    slot.write_pos = slot.ring.write_at(slot.write_pos, &remaining_payload[..chunk]);
    slot.read_pos = 0;

    slot.pending_push = if remaining_after > 0 {
        Some(PendingLongTuple {
            payload: remaining_payload[chunk..].to_vec(),
            written: fragments_sent + 1,
        })
    } else {
        None
    };

    remaining_after > 0
}

/// Reads the "bytes remaining after this fragment" header at the front of
/// the ring, without advancing `read_pos` past it permanently - callers
/// drive `read_pos`/`ntuples` bookkeeping themselves via
/// [`ConsumerSlot::pop_length`]-style reads, since the reader side still
/// needs ordinary lock/signal coordination per fragment.
pub(crate) fn peek_remaining_after(slot: &ConsumerSlot) -> usize {
    let mut header = [0u8; 4];
    slot.ring.read_at(0, &mut header);
    u32::from_ne_bytes(header) as usize
}
