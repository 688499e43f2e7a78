//! Shared state of one pool run
//!
//! The job cursor, the run counters, the live-children table, and the abort
//! flag are the only mutable state shared between workers. Two locks cover
//! them: one for cursor+counters (frequent, short critical sections) and one
//! for the children table, which must make "spawn a child" and "broadcast
//! the kill" mutually exclusive.

use std::fmt;
use std::io;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::warn;

use super::process_tree::ProcessKiller;
use crate::models::RunSummary;

#[derive(Debug, Default)]
struct SharedState {
    next_index: usize,
    total: usize,
    passed: usize,
}

/// Counter snapshot taken while recording an outcome, used for progress
/// logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    pub passed: usize,
    pub failed: usize,
    pub queued: usize,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} queued",
            self.passed, self.failed, self.queued
        )
    }
}

/// Shared mutable state for one run of the worker pool.
pub struct RunContext {
    job_count: usize,
    shared: Mutex<SharedState>,
    children: Mutex<Vec<Option<u32>>>,
    abort: AtomicBool,
}

impl RunContext {
    pub fn new(job_count: usize, workers: usize) -> Self {
        Self {
            job_count,
            shared: Mutex::new(SharedState::default()),
            children: Mutex::new(vec![None; workers.max(1)]),
            abort: AtomicBool::new(false),
        }
    }

    /// Claim the next job index. Claiming and advancing the cursor is one
    /// lock-protected step; indices come out in increasing order with no
    /// gaps or duplicates. Returns `None` once the list is exhausted or an
    /// abort was requested.
    pub fn claim(&self) -> Option<usize> {
        if self.abort_requested() {
            return None;
        }
        let mut shared = self.shared.lock().unwrap();
        if shared.next_index >= self.job_count {
            return None;
        }
        let index = shared.next_index;
        shared.next_index += 1;
        Some(index)
    }

    /// Record one counted outcome and return the counter snapshot.
    pub fn record(&self, passed: bool) -> Progress {
        let mut shared = self.shared.lock().unwrap();
        shared.total += 1;
        if passed {
            shared.passed += 1;
        }
        Progress {
            passed: shared.passed,
            failed: shared.total - shared.passed,
            queued: self.job_count - shared.total,
        }
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Spawn a child inside the children-table critical section. Refuses
    /// (returning `Ok(None)`) if an abort decision has already been made, so
    /// no process can start after the broadcast and none can be missed by
    /// it.
    pub fn spawn_guarded<F>(&self, worker: usize, spawn: F) -> io::Result<Option<Child>>
    where
        F: FnOnce() -> io::Result<Child>,
    {
        let mut children = self.children.lock().unwrap();
        if self.abort_requested() {
            return Ok(None);
        }
        let child = spawn()?;
        children[worker] = Some(child.id());
        Ok(Some(child))
    }

    /// Drop a worker's child registration after its wait completed.
    pub fn clear_child(&self, worker: usize) {
        self.children.lock().unwrap()[worker] = None;
    }

    /// Set the abort flag and kill every currently-live child. Performed
    /// under the children lock, mutually exclusive with any spawn.
    /// Idempotent: a second call finds the flag set and no live children it
    /// has not already signalled.
    pub fn abort_and_kill(&self, killer: &dyn ProcessKiller) {
        let children = self.children.lock().unwrap();
        if !self.abort.swap(true, Ordering::SeqCst) {
            warn!("Abort requested, terminating live jobs");
        }
        for pid in children.iter().flatten() {
            killer.kill_tree(*pid);
        }
    }

    /// Final counters; meaningful once every worker has exited.
    pub fn summary(&self) -> RunSummary {
        let shared = self.shared.lock().unwrap();
        RunSummary {
            total: shared.total,
            passed: shared.passed,
        }
    }
}
