//! Processor and worker-context contracts, plus the condvar signal pair.

use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::capability::CapabilityMask;
use super::entry::ExecutionEntry;
use super::task::StepResult;

/// A mutex/condvar pair used for job-arrival signaling and pause parking.
///
/// The mutex guards no data; it exists to serialize the condvar waits the
/// way the worker loop requires (re-check under lock, then wait).
#[derive(Debug, Default)]
pub struct SignalPair {
    lock: Mutex<()>,
    cond: Condvar,
}

impl SignalPair {
    /// New, unsignaled pair.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Acquire the guard used for condvar waits.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Block on the condvar until notified.
    pub fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.cond.wait(guard);
    }

    /// Block on the condvar until notified or the timeout elapses.
    /// Returns true if the wait timed out.
    pub fn wait_for(&self, guard: &mut MutexGuard<'_, ()>, timeout: Duration) -> bool {
        self.cond.wait_for(guard, timeout).timed_out()
    }

    /// Wake one waiter.
    pub fn notify_one(&self) {
        self.cond.notify_one();
    }

    /// Wake all waiters.
    pub fn notify_all(&self) {
        self.cond.notify_all();
    }

    /// Wake all waiters after taking the lock.
    ///
    /// Serializes with the waiters' predicate re-check: a waiter is either
    /// still before its re-check (and will observe the flipped flag) or
    /// already registered on the condvar (and receives this notify). Use
    /// this for untimed waits, where a lost wakeup would strand the waiter.
    pub fn notify_all_locked(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// A place work can run, tagged with a capability bitmask.
///
/// The task manager resolves each task to the registered processor whose
/// mask best matches the task's requirement and hands jobs over through
/// [`TaskProcessor::give_job`].
pub trait TaskProcessor: Send + Sync {
    /// Capability bits this processor advertises.
    fn capability(&self) -> CapabilityMask;

    /// Accept a job for execution. Must not block.
    fn give_job(&self, job: Box<ExecutionEntry>);

    /// Stop accepting work and wind down execution resources. Called once
    /// during manager shutdown, before the registry releases the processor.
    fn prepare_shutdown(&self) {}

    /// Suspend all execution; steps already mid-flight may complete.
    fn pause(&self) {}

    /// Resume execution after [`TaskProcessor::pause`].
    fn resume(&self) {}
}

/// Per-thread lifecycle hooks for the workers of a pool.
///
/// Lets a backend bind thread-affine resources to each worker thread: a
/// graphics context made current in [`WorkerLifecycle::on_worker_start`] and
/// released in [`WorkerLifecycle::on_worker_stop`], with the job hooks
/// bracketing every job regardless of its outcome. All four hooks run on the
/// worker's own thread.
pub trait WorkerLifecycle: Send + Sync {
    /// Called once on the worker thread before it takes any job.
    fn on_worker_start(&self) {}

    /// Called once on the worker thread after its loop exits.
    fn on_worker_stop(&self) {}

    /// Called before each job is processed.
    fn before_job(&self) {}

    /// Called after each job is processed.
    fn after_job(&self) {}
}

/// Callback surface a thread worker uses to pull jobs from its owning pool
/// and report step outcomes back.
pub trait WorkerContext: Send + Sync {
    /// Try to take the next job. Never blocks.
    fn dequeue_job(&self) -> Option<Box<ExecutionEntry>>;

    /// Rough emptiness check used to decide whether an idle wait is safe.
    fn is_queue_roughly_empty(&self) -> bool;

    /// Signal pair notified on job arrival; workers park their idle backoff
    /// here so new work wakes them before the backoff elapses.
    fn job_signal(&self) -> &SignalPair;

    /// Signal pair broadcast on resume; paused workers park here.
    fn pause_signal(&self) -> &SignalPair;

    /// Task finished successfully; entry is no longer needed.
    fn handle_done(&self, execution: Box<ExecutionEntry>);

    /// Task yielded; re-queue on this processor for an immediate re-attempt.
    fn handle_yield(&self, execution: Box<ExecutionEntry>);

    /// Task wants to sleep or wait on a condition; re-enter the manager.
    fn handle_wait(&self, execution: Box<ExecutionEntry>, result: StepResult);

    /// Task ended in error; entry is no longer needed.
    fn handle_error(&self, execution: Box<ExecutionEntry>);

    /// Release an entry that never reached execution (empty or already
    /// finished task).
    fn release_entry(&self, execution: Box<ExecutionEntry>);
}
