//! Pooled execution entries pairing a task handle with its last-step time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_queue::ArrayQueue;

use super::task::Task;

/// Record pairing a shared task handle with the timestamp of its last step,
/// used both for "time of last step" bookkeeping and delay-tier placement.
pub struct ExecutionEntry {
    /// Shared task reference; `None` only while the entry rests in the pool.
    pub(crate) task: Option<Arc<dyn Task>>,
    /// Last-step timestamp, advanced by the requested delay when sleeping.
    pub(crate) last_step: Instant,
}

impl ExecutionEntry {
    fn empty() -> Self {
        Self {
            task: None,
            last_step: Instant::now(),
        }
    }

    /// The wrapped task, if the entry is live.
    #[must_use]
    pub fn task(&self) -> Option<&Arc<dyn Task>> {
        self.task.as_ref()
    }

    fn clear(&mut self) {
        self.task = None;
    }
}

/// Lock-free recycling pool for execution entries.
///
/// Retain pops from the pool and falls back to a fresh heap allocation on
/// empty; release clears the task reference and pushes the entry back,
/// dropping it outright if the bounded pool rejects the return. Neither path
/// ever blocks.
pub(crate) struct EntryPool {
    slots: ArrayQueue<Box<ExecutionEntry>>,
    outstanding: AtomicUsize,
}

impl EntryPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(capacity.max(1)),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Take an entry for the given task, recycling a pooled one if possible.
    pub(crate) fn retain(&self, task: Arc<dyn Task>) -> Box<ExecutionEntry> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        let mut entry = self
            .slots
            .pop()
            .unwrap_or_else(|| Box::new(ExecutionEntry::empty()));
        entry.task = Some(task);
        entry.last_step = Instant::now();
        entry
    }

    /// Return an entry to the pool. The sole path back; entries are never
    /// recycled while referenced by any queue.
    pub(crate) fn release(&self, mut entry: Box<ExecutionEntry>) {
        entry.clear();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        // Bounded pool may reject under pressure; the entry is dropped
        // rather than leaked.
        drop(self.slots.push(entry));
    }

    /// Entries currently retained and not yet released.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Entries currently resting in the pool.
    pub(crate) fn pooled(&self) -> usize {
        self.slots.len()
    }
}
