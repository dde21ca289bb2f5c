//! Cleanup Hook (C8): ensures a process that dies (panics, or simply drops
//! its handles) without explicitly releasing every queue it touched still
//! gives them up, so other parties aren't left waiting on a party that will
//! never call `UnBind`/`Release` again.
//!
//! A real process-shared deployment wires this to an OS-level exit hook;
//! here it is an RAII guard, which gives the same "runs even on an
//! early-return or panic" guarantee within one process without needing a
//! global hook registry.

use crate::error::Result;
use crate::lifecycle;
use crate::registry::Registry;
use std::sync::{Arc, Mutex};

struct HeldQueue {
    entry: Arc<crate::entry::QueueEntry>,
    self_node: i32,
}

/// Tracks every queue a process has bound to, so they can all be torn down
/// together on exit.
#[derive(Default)]
pub struct CleanupRegistry {
    held: Mutex<Vec<HeldQueue>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `self_node` has bound to `entry` and must be released
    /// on cleanup unless it is untracked first.
    pub fn track(&self, entry: &Arc<crate::entry::QueueEntry>, self_node: i32) {
        self.held.lock().unwrap().push(HeldQueue {
            entry: Arc::clone(entry),
            self_node,
        });
    }

    /// Removes a queue from tracking, typically because it was released
    /// through the normal API path already.
    pub fn untrack(&self, name: &str, self_node: i32) {
        self.held
            .lock()
            .unwrap()
            .retain(|held| held.entry.key != name || held.self_node != self_node);
    }

    /// Number of queues currently tracked for cleanup.
    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    /// Releases every still-tracked queue. Errors from individual releases
    /// are logged and otherwise swallowed - cleanup must make a best effort
    /// for every entry rather than stop at the first failure.
    pub fn run(&self, registry: &Arc<Registry>) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for HeldQueue { entry, self_node } in held {
            if let Err(err) = lifecycle::release_by_node(registry, &entry, self_node) {
                tracing::warn!(queue = entry.key, node = self_node, error = %err, "cleanup release failed");
            }
        }
    }
}

/// RAII wrapper that runs [`CleanupRegistry::run`] on drop.
pub struct CleanupGuard {
    registry: Arc<Registry>,
    cleanup: Arc<CleanupRegistry>,
}

impl CleanupGuard {
    pub fn new(registry: Arc<Registry>, cleanup: Arc<CleanupRegistry>) -> Self {
        Self { registry, cleanup }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.cleanup.run(&self.registry);
    }
}

/// Convenience used by [`crate::Squeue`] callers that want cleanup to run
/// without holding onto the guard themselves (e.g. a short-lived binary).
pub fn run_now(registry: &Arc<Registry>, cleanup: &Arc<CleanupRegistry>) -> Result<()> {
    cleanup.run(registry);
    Ok(())
}
