//! End-to-end scenarios against the public `Squeue` facade: single small
//! tuple delivery, ring overflow spilling to the producer-local store and
//! draining back out via `Dump`/`Finish`, long-tuple streaming, producer
//! failure, a straggling consumer that never binds, a stale-queue acquire
//! race, non-blocking reads, disconnecting a destination, and process-exit
//! cleanup.

use squeue_rs::{BindRole, ReadOutcome, SquashConfig, SqueueError, Squeue};

fn producer_handle(role: BindRole) -> squeue_rs::ProducerHandle {
    match role {
        BindRole::Producer(p) => p,
        BindRole::Consumer(_) => panic!("expected producer role"),
    }
}

fn consumer_handle(role: BindRole) -> squeue_rs::ConsumerHandle {
    match role {
        BindRole::Consumer(c) => c,
        BindRole::Producer(_) => panic!("expected consumer role"),
    }
}

/// Single small tuple, one consumer.
#[test]
fn single_small_tuple_one_consumer() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q1", 1, 7).unwrap();

    let producer = producer_handle(squeue.bind("q1", 1, 0, &[7], &[7]).unwrap());
    let consumer = consumer_handle(squeue.bind("q1", 2, 7, &[7], &[7]).unwrap());

    producer.write(7, &[0x41, 0x42, 0x43]).unwrap();
    assert_eq!(consumer.read().unwrap(), Some(vec![0x41, 0x42, 0x43]));

    producer.finish(7).unwrap();
    assert_eq!(consumer.read().unwrap(), None);

    producer.unbind().unwrap();
    assert!(squeue.is_empty());
}

/// Ring too small to hold everything at once, tuples spill to the
/// overflow store and are recovered via `Dump`.
#[test]
fn ring_overflow_spills_to_store() {
    // num_queues=4, max_nodes=2 (1 consumer), region sized so ring_bytes(1) == 64.
    let squeue = Squeue::init(SquashConfig::new(4, 2, 640));
    squeue.acquire("q2", 1, 1).unwrap();

    let producer = producer_handle(squeue.bind("q2", 1, 0, &[1], &[1]).unwrap());
    let consumer = consumer_handle(squeue.bind("q2", 2, 1, &[1], &[1]).unwrap());

    // Each record is 4 (header) + 16 (payload) = 20 bytes; a 64-byte ring
    // holds 3 before the 4th must spill.
    let tuples: Vec<Vec<u8>> = (0..6u8).map(|i| vec![i; 16]).collect();
    for t in &tuples {
        producer.write(1, t).unwrap();
    }
    assert!(!producer.can_pause(1).unwrap());

    let mut received = Vec::new();
    for _ in 0..2 {
        received.push(consumer.read().unwrap().unwrap());
    }
    assert!(producer.dump(1).unwrap());
    assert!(producer.can_pause(1).unwrap());

    for _ in 2..6 {
        received.push(consumer.read().unwrap().unwrap());
    }

    assert_eq!(received, tuples);
}

/// A tuple larger than the ring is streamed via the long-tuple protocol.
#[test]
fn long_tuple_round_trips() {
    let squeue = Squeue::init(SquashConfig::new(4, 2, 640));
    squeue.acquire("q3", 1, 1).unwrap();

    let producer = producer_handle(squeue.bind("q3", 1, 0, &[1], &[1]).unwrap());
    let consumer = consumer_handle(squeue.bind("q3", 2, 1, &[1], &[1]).unwrap());

    let payload: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();
    producer.write(1, &payload).unwrap();
    assert_eq!(consumer.read().unwrap(), Some(payload));
}

/// The producer fails mid-stream; the blocked consumer must observe
/// `ProducerFailed` rather than hang.
#[test]
fn producer_failure_surfaces_to_consumer() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q4", 1, 9).unwrap();

    let producer = producer_handle(squeue.bind("q4", 1, 0, &[9], &[9]).unwrap());
    let consumer = consumer_handle(squeue.bind("q4", 2, 9, &[9], &[9]).unwrap());

    for i in 0..5u8 {
        producer.write(9, &[i]).unwrap();
    }
    for i in 0..5u8 {
        assert_eq!(consumer.read().unwrap(), Some(vec![i]));
    }

    let waiter = std::thread::spawn(move || consumer.read());

    // Give the reader a moment to block on the empty ring before we fail it.
    std::thread::sleep(std::time::Duration::from_millis(20));
    producer.unbind_failed().unwrap();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(err, SqueueError::ProducerFailed { .. }));
}

/// One of two consumers never binds; `UnBind` must still complete by
/// auto-finalizing the destination nobody showed up for.
#[test]
fn unbind_completes_when_a_consumer_never_binds() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q5", 2, 11).unwrap();

    let producer = producer_handle(
        squeue
            .bind("q5", 1, 0, &[11, 12], &[11, 12])
            .unwrap(),
    );
    let consumer = consumer_handle(squeue.bind("q5", 2, 11, &[11, 12], &[11, 12]).unwrap());

    producer.write(11, b"only one consumer shows").unwrap();
    assert_eq!(
        consumer.read().unwrap(),
        Some(b"only one consumer shows".to_vec())
    );
    producer.finish(11).unwrap();
    assert_eq!(consumer.read().unwrap(), None);
    consumer.release().unwrap();

    // node 12 never binds; unbind must still complete.
    producer.unbind().unwrap();
    assert!(squeue.is_empty());
}

/// Acquiring a name whose entry still has a live producer and an active slot
/// for the caller's own node must retry and eventually give up, rather than
/// silently reusing state that belongs to a still-running execution.
#[test]
fn genuinely_stale_acquire_eventually_times_out() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q6", 1, 3).unwrap();
    let _producer = producer_handle(squeue.bind("q6", 1, 0, &[3], &[3]).unwrap());
    let _consumer = consumer_handle(squeue.bind("q6", 2, 3, &[3], &[3]).unwrap());
    // Consumer's slot is ACTIVE and producer_pid != 0: a second Acquire for
    // node 3 must see this as a stale leftover and eventually time out.
    let err = squeue.acquire("q6", 1, 3).unwrap_err();
    assert!(matches!(err, SqueueError::StaleQueueTimeout { .. }));
}

/// `DisconnectConsumer` marks the matching slot `DONE` directly (the remote
/// node told us it will never read again - not a failure), waking a blocked
/// reader with a normal end-of-stream rather than an error. It is a no-op
/// for an unknown queue.
#[test]
fn disconnect_consumer_finalizes_destination_and_wakes_reader() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("qd", 1, 4).unwrap();
    let producer = producer_handle(squeue.bind("qd", 1, 0, &[4], &[4]).unwrap());
    let consumer = consumer_handle(squeue.bind("qd", 2, 4, &[4], &[4]).unwrap());

    let waiter = std::thread::spawn(move || consumer.read());
    std::thread::sleep(std::time::Duration::from_millis(20));
    squeue.disconnect_consumer("qd", 4);

    assert_eq!(waiter.join().unwrap().unwrap(), None);

    producer.unbind().unwrap();
    assert!(squeue.is_empty());

    // No-op for a queue that doesn't exist.
    squeue.disconnect_consumer("does-not-exist", 4);
}

/// `try_read` (`canwait=false`) never blocks: it reports `WouldBlock`
/// instead of waiting when the producer is still active and nothing is
/// queued yet.
#[test]
fn try_read_reports_would_block_instead_of_blocking() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q7", 1, 5).unwrap();
    let producer = producer_handle(squeue.bind("q7", 1, 0, &[5], &[5]).unwrap());
    let consumer = consumer_handle(squeue.bind("q7", 2, 5, &[5], &[5]).unwrap());

    assert_eq!(consumer.try_read().unwrap(), ReadOutcome::WouldBlock);

    producer.write(5, b"ready").unwrap();
    assert_eq!(
        consumer.try_read().unwrap(),
        ReadOutcome::Tuple(b"ready".to_vec())
    );
    assert_eq!(consumer.try_read().unwrap(), ReadOutcome::WouldBlock);

    producer.finish(5).unwrap();
    assert_eq!(consumer.try_read().unwrap(), ReadOutcome::Eof);

    producer.unbind().unwrap();
    assert!(squeue.is_empty());
}

/// `Finish` must drain anything still backlogged in the overflow store
/// before moving the slot to `EOF`, rather than stranding it there.
#[test]
fn finish_drains_backlogged_overflow_before_eof() {
    // ring_bytes(1) == 64: 3 tuples of 20 bytes each fit, the 4th spills.
    let squeue = Squeue::init(SquashConfig::new(4, 2, 640));
    squeue.acquire("q8", 1, 6).unwrap();
    let producer = producer_handle(squeue.bind("q8", 1, 0, &[6], &[6]).unwrap());
    let consumer = consumer_handle(squeue.bind("q8", 2, 6, &[6], &[6]).unwrap());

    let tuples: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 16]).collect();
    for t in &tuples {
        producer.write(6, t).unwrap();
    }
    assert!(!producer.can_pause(6).unwrap());

    // Free up exactly enough ring space for the one overflowed tuple before
    // Finish is called.
    let first = consumer.read().unwrap().unwrap();
    producer.finish(6).unwrap();
    assert!(producer.can_pause(6).unwrap());

    let mut received = vec![first];
    while let Some(t) = consumer.read().unwrap() {
        received.push(t);
    }
    assert_eq!(received, tuples);

    producer.unbind().unwrap();
    assert!(squeue.is_empty());
}

/// A consumer bind is tracked automatically; dropping the process-wide
/// cleanup guard without an explicit `Release` still unblocks the producer.
#[test]
fn cleanup_guard_releases_untracked_consumers_on_drop() {
    let squeue = Squeue::init(SquashConfig::new(4, 8, 1 << 20));
    squeue.acquire("q9", 1, 13).unwrap();
    let producer = producer_handle(squeue.bind("q9", 1, 0, &[13], &[13]).unwrap());
    let _consumer = consumer_handle(squeue.bind("q9", 2, 13, &[13], &[13]).unwrap());

    producer.finish(13).unwrap();
    {
        let _guard = squeue.cleanup_guard();
        // Dropped here without ever calling `consumer.release()`.
    }

    producer.unbind().unwrap();
    assert!(squeue.is_empty());
}
