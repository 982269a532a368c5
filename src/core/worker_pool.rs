//! Processor backed by a pool of thread workers and a lock-free job queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::IdleBackoff;

use super::capability::CapabilityMask;
use super::entry::ExecutionEntry;
use super::manager::SchedulerCore;
use super::processor::{SignalPair, TaskProcessor, WorkerContext, WorkerLifecycle};
use super::task::{StepResult, TaskState};
use super::worker::ThreadWorker;

/// A [`TaskProcessor`] owning a dynamically resizable list of thread workers
/// and one lock-free MPMC job queue.
///
/// The worker list is the only structure under a mutex; job flow is
/// lock-free with a condvar signal for idle workers. Pools start with zero
/// workers so subsystems can scale them lazily once their execution
/// precondition (e.g. a graphics context) becomes available.
pub struct ThreadWorkerPool {
    scheduler: Weak<SchedulerCore>,
    capability: CapabilityMask,
    jobs: SegQueue<Box<ExecutionEntry>>,
    job_signal: SignalPair,
    pause_signal: SignalPair,
    workers: Mutex<Vec<ThreadWorker>>,
    /// Mirror of the worker-list length for advisory reads without the lock.
    worker_count: AtomicUsize,
    next_worker_id: AtomicUsize,
    backoff: IdleBackoff,
    /// Per-thread hooks applied to every worker this pool spawns.
    lifecycle: Option<Arc<dyn WorkerLifecycle>>,
    shutdown: AtomicBool,
}

impl ThreadWorkerPool {
    pub(crate) fn new(
        scheduler: Weak<SchedulerCore>,
        capability: CapabilityMask,
        backoff: IdleBackoff,
        lifecycle: Option<Arc<dyn WorkerLifecycle>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            capability,
            jobs: SegQueue::new(),
            job_signal: SignalPair::new(),
            pause_signal: SignalPair::new(),
            workers: Mutex::new(Vec::new()),
            worker_count: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            backoff,
            lifecycle,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Grow the pool by up to `count` workers, retrying failed spawns up to
    /// twice the requested amount. Returns how many workers were added.
    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> usize {
        if count == 0 || self.shutdown.load(Ordering::Acquire) {
            return 0;
        }

        let mut created = Vec::with_capacity(count);
        let max_attempts = count * 2;
        for _ in 0..max_attempts {
            if created.len() >= count {
                break;
            }
            let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let name = format!("tier-worker-{:x}-{worker_id}", self.capability.bits());
            let context: Arc<dyn WorkerContext> = Arc::clone(self) as Arc<dyn WorkerContext>;
            match ThreadWorker::spawn(name, context, self.backoff.clone(), self.lifecycle.clone())
            {
                Ok(worker) => created.push(worker),
                Err(e) => warn!(capability = %self.capability, error = %e, "worker spawn failed"),
            }
        }

        let added = created.len();
        if added > 0 {
            let mut list = self.workers.lock();
            list.extend(created);
            self.worker_count.store(list.len(), Ordering::Release);
            info!(capability = %self.capability, added, total = list.len(), "workers added");
        }
        added
    }

    /// Remove one worker from the pool, stopping and joining it.
    pub fn shrink(&self) {
        let removed = {
            let mut list = self.workers.lock();
            if list.is_empty() {
                return;
            }
            let worker = list.remove(0);
            self.worker_count.store(list.len(), Ordering::Release);
            worker
        };
        drop(removed);
        debug!(capability = %self.capability, "worker removed");
    }

    /// Advisory worker count; reads an atomic mirror rather than the list
    /// lock, trading strict consistency for liveness.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::Acquire)
    }

    /// Approximate number of jobs waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.jobs.len()
    }

    /// Suspend this pool's workers; steps already mid-flight complete. Jobs
    /// keep queueing while paused.
    pub fn pause_workers(&self) {
        {
            let list = self.workers.lock();
            for worker in list.iter() {
                worker.request_pause();
            }
        }
        // Wake idle waits so workers observe the pause immediately.
        self.job_signal.notify_all();
    }

    /// Resume workers suspended by [`Self::pause_workers`].
    pub fn resume_workers(&self) {
        {
            let list = self.workers.lock();
            for worker in list.iter() {
                worker.request_resume();
            }
        }
        // Locked notify; the pause wait is untimed.
        self.pause_signal.notify_all_locked();
    }

    /// Drop workers that exited on their own (e.g. failed initialization).
    pub fn collect_stopped_workers(&self) {
        let mut list = self.workers.lock();
        list.retain(ThreadWorker::is_running);
        self.worker_count.store(list.len(), Ordering::Release);
    }

    /// Stop and join every worker, then drain the job queue, force-erroring
    /// any task that has not already finished. No task handle is silently
    /// dropped.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut list = self.workers.lock();
            for worker in list.iter() {
                worker.request_stop();
            }
            // Dropping each worker joins its thread.
            list.clear();
            self.worker_count.store(0, Ordering::Release);
        }

        let mut cancelled = 0_usize;
        while let Some(job) = self.jobs.pop() {
            self.cancel_job(job);
            cancelled += 1;
        }
        if cancelled > 0 {
            info!(capability = %self.capability, cancelled, "pool teardown cancelled queued jobs");
        }
    }

    /// Force-error a never-dispatched job and release its entry.
    fn cancel_job(&self, execution: Box<ExecutionEntry>) {
        if let Some(task) = execution.task() {
            if !task.is_finished() {
                task.state().set_error_flag();
                task.state().store(TaskState::ERROR);
            }
        }
        self.release_to_scheduler(execution);
    }

    /// Hand an entry back to the manager's pool; if the manager is already
    /// gone the entry is simply dropped.
    fn release_to_scheduler(&self, execution: Box<ExecutionEntry>) {
        if let Some(core) = self.scheduler.upgrade() {
            core.release_execution(execution);
        }
    }
}

impl TaskProcessor for ThreadWorkerPool {
    fn capability(&self) -> CapabilityMask {
        self.capability
    }

    fn give_job(&self, job: Box<ExecutionEntry>) {
        if self.shutdown.load(Ordering::Acquire) {
            self.cancel_job(job);
            return;
        }
        self.jobs.push(job);
        self.job_signal.notify_one();
    }

    fn prepare_shutdown(&self) {
        self.shutdown();
    }

    fn pause(&self) {
        self.pause_workers();
    }

    fn resume(&self) {
        self.resume_workers();
    }
}

impl WorkerContext for ThreadWorkerPool {
    fn dequeue_job(&self) -> Option<Box<ExecutionEntry>> {
        self.jobs.pop()
    }

    fn is_queue_roughly_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn job_signal(&self) -> &SignalPair {
        &self.job_signal
    }

    fn pause_signal(&self) -> &SignalPair {
        &self.pause_signal
    }

    fn handle_done(&self, execution: Box<ExecutionEntry>) {
        self.release_to_scheduler(execution);
    }

    fn handle_yield(&self, execution: Box<ExecutionEntry>) {
        // Immediate re-attempt on this pool, no manager round-trip.
        self.jobs.push(execution);
    }

    fn handle_wait(&self, execution: Box<ExecutionEntry>, result: StepResult) {
        let Some(core) = self.scheduler.upgrade() else {
            return;
        };
        match result {
            StepResult::Sleep(delay) => core.request_delayed_execution(execution, delay),
            StepResult::WaitCondition => core.request_execution(execution),
            StepResult::Finished | StepResult::Yield => {
                // Not a waiting outcome; treat defensively as an error.
                if let Some(task) = execution.task() {
                    if !task.is_finished() {
                        task.state().set_error_flag();
                        task.state().store(TaskState::ERROR);
                    }
                }
                core.release_execution(execution);
            }
        }
    }

    fn handle_error(&self, execution: Box<ExecutionEntry>) {
        self.release_to_scheduler(execution);
    }

    fn release_entry(&self, execution: Box<ExecutionEntry>) {
        self.release_to_scheduler(execution);
    }
}

impl Drop for ThreadWorkerPool {
    fn drop(&mut self) {
        // Worker threads hold an Arc to this pool, so by the time Drop runs
        // they have all exited; only leftover queued jobs remain.
        while let Some(job) = self.jobs.pop() {
            if let Some(task) = job.task() {
                if !task.is_finished() {
                    task.state().set_error_flag();
                    task.state().store(TaskState::ERROR);
                }
            }
        }
    }
}
