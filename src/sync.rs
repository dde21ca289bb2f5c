//! Sync Block (C3): one wakeup signal for the producer and one per consumer,
//! drawn from a fixed pool rented for a queue's lifetime.
//!
//! A [`Signal`] is a level-triggered, single-slot condition variable: reset
//! it under the protecting lock before releasing that lock to wait, exactly
//! the pattern the lifecycle manager and transfer engine use throughout - a
//! process is never suspended while holding any lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A single-signal, level-triggered wakeup primitive, standing in for the
/// named POSIX semaphore / futex a real process-shared implementation would
/// use.
#[derive(Default)]
pub struct Signal {
    ready: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            ready: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Marks the signal ready and wakes every waiter.
    pub fn signal(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready = true;
        self.condvar.notify_all();
    }

    /// Clears the signal. Must be called under the caller's own protecting
    /// lock, before that lock is released, so a concurrent `signal()` is
    /// never lost between the check and the wait.
    pub fn reset(&self) {
        *self.ready.lock().unwrap() = false;
    }

    /// Blocks uninterruptibly until [`Self::signal`] is called.
    pub fn wait(&self) {
        let guard = self.ready.lock().unwrap();
        let _unused = self
            .condvar
            .wait_while(guard, |ready| !*ready)
            .unwrap();
    }

    /// Blocks until signaled or `timeout` elapses; returns `true` on
    /// timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.ready.lock().unwrap();
        let (_guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |ready| !*ready)
            .unwrap();
        result.timed_out()
    }
}

/// One queue's worth of wakeup signals: `producer_signal` plus one
/// `consumer_signal` per potential consumer slot.
pub struct SyncBlock {
    /// Wakeup primitive the producer sleeps on.
    pub producer_signal: Signal,
    /// Wakeup primitives each consumer sleeps on, indexed by slot.
    pub consumer_signals: Vec<Signal>,
    in_use: AtomicBool,
}

impl SyncBlock {
    fn new(max_consumers: usize) -> Self {
        Self {
            producer_signal: Signal::new(),
            consumer_signals: (0..max_consumers).map(|_| Signal::new()).collect(),
            in_use: AtomicBool::new(false),
        }
    }

    fn reset(&self) {
        self.producer_signal.reset();
        for signal in &self.consumer_signals {
            signal.reset();
        }
    }
}

/// Fixed pool of [`SyncBlock`]s, allocated once at process-group startup and
/// rented out to queue entries for their lifetime.
pub struct SyncPool {
    blocks: Vec<SyncBlock>,
}

impl SyncPool {
    pub(crate) fn new(capacity: usize, max_consumers: usize) -> Self {
        let blocks = (0..capacity).map(|_| SyncBlock::new(max_consumers)).collect();
        Self { blocks }
    }

    /// Total number of sync blocks in the pool.
    pub(crate) fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Rents an unused block, returning its pool index, or `None` if every
    /// block is currently in use.
    pub(crate) fn rent(&self) -> Option<usize> {
        for (index, block) in self.blocks.iter().enumerate() {
            if block
                .in_use
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                block.reset();
                return Some(index);
            }
        }
        None
    }

    /// Returns a previously rented block to the pool.
    pub(crate) fn release(&self, index: usize) {
        self.blocks[index].reset();
        self.blocks[index].in_use.store(false, Ordering::Release);
    }

    /// Looks up a block by its rented index.
    pub(crate) fn get(&self, index: usize) -> &SyncBlock {
        &self.blocks[index]
    }
}
