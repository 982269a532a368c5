//! Thread worker: one OS thread that executes one job at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::debug;

use crate::config::IdleBackoff;

use super::entry::ExecutionEntry;
use super::processor::{WorkerContext, WorkerLifecycle};
use super::task::{StepResult, TaskState};

/// Atomic lifecycle flags shared between a worker's handle and its thread.
#[derive(Debug, Default)]
pub(crate) struct WorkerFlags {
    shutdown_requested: AtomicBool,
    finished: AtomicBool,
    pause_requested: AtomicBool,
}

/// A single worker thread bound to a [`WorkerContext`].
///
/// Lifecycle: constructed (thread spawned) → running → paused ⇄ running →
/// stopped (joined) on drop.
pub(crate) struct ThreadWorker {
    flags: Arc<WorkerFlags>,
    context: Arc<dyn WorkerContext>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    /// Spawn a named worker thread. Surfaces OS thread-creation failure.
    pub(crate) fn spawn(
        name: String,
        context: Arc<dyn WorkerContext>,
        backoff: IdleBackoff,
        lifecycle: Option<Arc<dyn WorkerLifecycle>>,
    ) -> std::io::Result<Self> {
        let flags = Arc::new(WorkerFlags::default());
        let thread_flags = Arc::clone(&flags);
        let thread_context = Arc::clone(&context);

        let handle = thread::Builder::new().name(name).spawn(move || {
            if let Some(lifecycle) = &lifecycle {
                lifecycle.on_worker_start();
            }
            worker_loop(
                &thread_flags,
                thread_context.as_ref(),
                &backoff,
                lifecycle.as_deref(),
            );
            if let Some(lifecycle) = &lifecycle {
                lifecycle.on_worker_stop();
            }
            thread_flags.finished.store(true, Ordering::Release);
        })?;

        Ok(Self {
            flags,
            context,
            handle: Some(handle),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.flags.finished.load(Ordering::Acquire)
    }

    /// Request the worker to stop, waking it out of any idle or pause wait.
    pub(crate) fn request_stop(&self) {
        self.flags.shutdown_requested.store(true, Ordering::Release);
        self.flags.pause_requested.store(false, Ordering::Release);
        // Locked notifies: the pause wait is untimed, so a notify slipping
        // between its flag re-check and wait registration would strand the
        // thread and hang the join.
        self.context.job_signal().notify_all_locked();
        self.context.pause_signal().notify_all_locked();
    }

    pub(crate) fn request_pause(&self) {
        self.flags.pause_requested.store(true, Ordering::Release);
    }

    pub(crate) fn request_resume(&self) {
        self.flags.pause_requested.store(false, Ordering::Release);
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("worker thread panicked before join");
            }
        }
    }
}

fn worker_loop(
    flags: &WorkerFlags,
    context: &dyn WorkerContext,
    backoff: &IdleBackoff,
    lifecycle: Option<&dyn WorkerLifecycle>,
) {
    debug!("worker thread started");

    let mut no_work_streak: u32 = 0;
    while !flags.shutdown_requested.load(Ordering::Acquire) {
        if flags.pause_requested.load(Ordering::Acquire) {
            wait_paused(flags, context);
            continue;
        }

        if let Some(job) = context.dequeue_job() {
            no_work_streak = 0;
            if let Some(lifecycle) = lifecycle {
                lifecycle.before_job();
            }
            process_job(context, job);
            if let Some(lifecycle) = lifecycle {
                lifecycle.after_job();
            }
            thread::yield_now();
        } else {
            no_work_streak = no_work_streak.saturating_add(1);
            idle_wait(flags, context, backoff, no_work_streak);
        }
    }

    debug!("worker thread exiting");
}

/// Run one step of a job and route the outcome back into the context.
fn process_job(context: &dyn WorkerContext, mut execution: Box<ExecutionEntry>) {
    let Some(task) = execution.task().cloned() else {
        context.release_entry(execution);
        return;
    };
    if task.is_finished() {
        context.release_entry(execution);
        return;
    }
    if task.has_error() {
        task.state().store(TaskState::ERROR);
        context.handle_error(execution);
        return;
    }

    // First touch of this task.
    if !task.state().load().contains(TaskState::STARTED) {
        task.on_before_process();
        task.state().mark(TaskState::STARTED);
        if task.has_error() {
            task.state().store(TaskState::ERROR);
            context.handle_error(execution);
            return;
        }
    }

    task.state().mark(TaskState::PROCESSING);
    task.on_before_step();

    let result = task.step();
    execution.last_step = Instant::now();

    task.on_after_step();
    task.state().clear_processing();

    if task.has_error() {
        task.state().store(TaskState::ERROR);
        context.handle_error(execution);
        return;
    }

    match result {
        StepResult::Finished => {
            task.on_after_process();
            if task.has_error() {
                task.state().store(TaskState::ERROR);
                context.handle_error(execution);
            } else {
                task.state().store(TaskState::DONE);
                context.handle_done(execution);
            }
        }
        StepResult::Yield => context.handle_yield(execution),
        StepResult::Sleep(delay) if delay.is_zero() => context.handle_yield(execution),
        waiting @ (StepResult::Sleep(_) | StepResult::WaitCondition) => {
            context.handle_wait(execution, waiting);
        }
    }
}

/// Tiered idle backoff: no delay while the streak is short, then increasing
/// timed condvar waits so a newly arriving job wakes the worker immediately.
fn idle_wait(
    flags: &WorkerFlags,
    context: &dyn WorkerContext,
    backoff: &IdleBackoff,
    no_work_streak: u32,
) {
    let Some(delay) = backoff.delay_for(no_work_streak) else {
        thread::yield_now();
        return;
    };

    let signal = context.job_signal();
    let mut guard = signal.lock();
    if flags.shutdown_requested.load(Ordering::Acquire)
        || flags.pause_requested.load(Ordering::Acquire)
    {
        return;
    }
    // Re-check under the lock: a job enqueued during processing must not be
    // slept past. Not strictly synchronized with intake; the worst case is
    // one backoff step of extra latency.
    if context.is_queue_roughly_empty() {
        signal.wait_for(&mut guard, delay);
    }
}

/// Park on the pause condvar until resumed, tolerant of spurious wakeups.
fn wait_paused(flags: &WorkerFlags, context: &dyn WorkerContext) {
    while flags.pause_requested.load(Ordering::Acquire) {
        {
            let signal = context.pause_signal();
            let mut guard = signal.lock();
            if flags.pause_requested.load(Ordering::Acquire) {
                signal.wait(&mut guard);
            }
        }

        if flags.shutdown_requested.load(Ordering::Acquire) {
            flags.pause_requested.store(false, Ordering::Release);
            break;
        }
    }
}
