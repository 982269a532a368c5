//! Task manager orchestration: capability registry, delay-scheduling tiers,
//! condition-waiting queues, and the realtime hint path.
//!
//! The manager is an explicitly constructed and owned object: producers get a
//! reference and call [`TaskManager::execute_task`]; the host drives
//! [`TaskManager::on_frame`] from its frame loop and
//! [`TaskManager::pause`]/[`TaskManager::resume`] from its lifecycle hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_queue::SegQueue;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;

use super::capability::CapabilityMask;
use super::entry::{EntryPool, ExecutionEntry};
use super::error::SchedulerError;
use super::processor::{SignalPair, TaskProcessor};
use super::subsystem::{SubsystemContext, TaskSubsystem};
use super::task::{Task, TaskPriority, TaskState};
use super::worker_pool::ThreadWorkerPool;

/// How often (in frames) the long-term condition-waiting queue is polled
/// from the frame tick.
const LONG_TERM_FRAME_INTERVAL: u64 = 8;

/// Non-blocking guard over an `AtomicBool` CAS flag, released on drop.
struct CasGuard<'a>(&'a AtomicBool);

impl<'a> CasGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.load(Ordering::Acquire) {
            return None;
        }
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CasGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Write-once mapping from capability masks to processors.
///
/// Built once during initialization and read without locking afterwards; it
/// is not safe to mutate concurrently with lookups, which is why it lives in
/// a `OnceLock` sealed before steady-state dispatch begins.
struct CapabilityRegistry {
    processors: Vec<Arc<dyn TaskProcessor>>,
    masks: Vec<CapabilityMask>,
    exact: HashMap<u32, usize>,
}

impl CapabilityRegistry {
    fn new() -> Self {
        Self {
            processors: Vec::new(),
            masks: Vec::new(),
            exact: HashMap::new(),
        }
    }

    fn register(&mut self, processor: Arc<dyn TaskProcessor>) {
        let mask = processor.capability();
        let index = self.processors.len();
        self.masks.push(mask);
        self.exact.entry(mask.bits()).or_insert(index);
        self.processors.push(processor);
        debug!(capability = %mask, index, "processor registered");
    }

    /// Exact-mask lookup first; on miss, scan for the superset match with
    /// the fewest differing bits from the requirement. Ties resolve by
    /// registration order.
    fn resolve(
        &self,
        required: CapabilityMask,
        general: CapabilityMask,
    ) -> Option<&Arc<dyn TaskProcessor>> {
        if let Some(&index) = self.exact.get(&required.bits()) {
            return Some(&self.processors[index]);
        }

        let mut best: Option<(usize, u32)> = None;
        for (index, mask) in self.masks.iter().enumerate() {
            if !(*mask | general).satisfies(required) {
                continue;
            }
            let diff = mask.distance(required);
            if best.map_or(true, |(_, best_diff)| diff < best_diff) {
                best = Some((index, diff));
                if diff <= 1 {
                    break;
                }
            }
        }

        best.map(|(index, _)| &self.processors[index])
    }
}

/// One delay bucket: a minimum-wait threshold and its own lock-free queue,
/// serviced by a dedicated scheduling thread.
struct Tier {
    threshold: Duration,
    queue: SegQueue<Box<ExecutionEntry>>,
}

/// Which condition-waiting queue to reprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitQueue {
    Realtime,
    ShortTerm,
    LongTerm,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of scheduler bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    /// Tasks accepted by [`TaskManager::execute_task`].
    pub submitted_tasks: u64,
    /// Tasks rejected for an unsatisfiable capability requirement.
    pub rejected_tasks: u64,
    /// Execution entries retained and not yet released.
    pub outstanding_entries: usize,
    /// Execution entries resting in the recycling pool.
    pub pooled_entries: usize,
}

/// Shared scheduler state reachable from tier threads and worker pools.
pub(crate) struct SchedulerCore {
    config: SchedulerConfig,
    entry_pool: EntryPool,
    /// Capability bits OR'd into every processor mask during resolution.
    general_capability: AtomicU32,
    registry: OnceLock<CapabilityRegistry>,

    tiers: Vec<Tier>,
    realtime_queue: SegQueue<Box<ExecutionEntry>>,
    realtime_scheduling: AtomicBool,

    wait_realtime: SegQueue<Box<ExecutionEntry>>,
    wait_short_term: SegQueue<Box<ExecutionEntry>>,
    wait_long_term: SegQueue<Box<ExecutionEntry>>,
    /// Single guard shared by all three condition-waiting queues; a
    /// deliberate serialization point.
    condition_processing: AtomicBool,

    running: AtomicBool,
    paused: AtomicBool,
    pause_signal: SignalPair,

    counters: SchedulerCounters,
}

impl SchedulerCore {
    fn new(config: SchedulerConfig) -> Self {
        let tiers = config
            .tier_thresholds()
            .into_iter()
            .map(|threshold| Tier {
                threshold,
                queue: SegQueue::new(),
            })
            .collect();
        let entry_pool = EntryPool::new(config.entry_pool_capacity);
        Self {
            config,
            entry_pool,
            general_capability: AtomicU32::new(CapabilityMask::GENERAL.bits()),
            registry: OnceLock::new(),
            tiers,
            realtime_queue: SegQueue::new(),
            realtime_scheduling: AtomicBool::new(false),
            wait_realtime: SegQueue::new(),
            wait_short_term: SegQueue::new(),
            wait_long_term: SegQueue::new(),
            condition_processing: AtomicBool::new(false),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pause_signal: SignalPair::new(),
            counters: SchedulerCounters::default(),
        }
    }

    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn general_capability(&self) -> CapabilityMask {
        CapabilityMask::from_bits(self.general_capability.load(Ordering::Acquire))
    }

    fn resolve_processor(&self, required: CapabilityMask) -> Option<Arc<dyn TaskProcessor>> {
        self.registry
            .get()
            .and_then(|registry| registry.resolve(required, self.general_capability()))
            .cloned()
    }

    /// Accept a task: resolve a processor up front, retain an entry, and
    /// enter the scheduling pipeline.
    fn execute_task(&self, task: Arc<dyn Task>) -> Result<(), SchedulerError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }

        let required = task.required_capabilities();
        if self.resolve_processor(required).is_none() {
            // Unsatisfiable requirement: terminal error, step never runs.
            task.state().set_error_flag();
            task.state().store(TaskState::ERROR);
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(capability = %required, "no processor for task capability");
            return Err(SchedulerError::NoCapableProcessor(required));
        }

        task.state().mark(TaskState::QUEUED);
        let entry = self.entry_pool.retain(task);
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        self.request_execution(entry);
        self.hint_realtime();
        Ok(())
    }

    /// Entry/re-entry point for dispatch: park not-yet-ready tasks in the
    /// priority-appropriate condition-waiting queue, hand the rest to their
    /// processor.
    pub(crate) fn request_execution(&self, execution: Box<ExecutionEntry>) {
        let Some(task) = execution.task().cloned() else {
            self.release_execution(execution);
            return;
        };

        if !task.is_ready() {
            match task.priority() {
                TaskPriority::Background => self.wait_long_term.push(execution),
                TaskPriority::HighPriority => self.wait_realtime.push(execution),
                TaskPriority::Default => self.wait_short_term.push(execution),
            }
            return;
        }

        self.dispatch_execution(execution);
    }

    /// Delayed re-entry: advance the entry's timestamp and place it in the
    /// coarsest tier that will not wake it meaningfully early.
    pub(crate) fn request_delayed_execution(
        &self,
        mut execution: Box<ExecutionEntry>,
        delay: Duration,
    ) {
        if delay.is_zero() {
            self.request_execution(execution);
            return;
        }

        execution.last_step += delay;
        self.enqueue_waiting(execution);
    }

    /// Return an entry to the recycling pool. The sole release path.
    pub(crate) fn release_execution(&self, execution: Box<ExecutionEntry>) {
        self.entry_pool.release(execution);
    }

    fn dispatch_execution(&self, execution: Box<ExecutionEntry>) {
        let required = execution
            .task()
            .map_or(CapabilityMask::GENERAL, |task| task.required_capabilities());

        match self.resolve_processor(required) {
            Some(processor) => processor.give_job(execution),
            None => {
                // Resolution failed after admission; fail the task rather
                // than losing the entry.
                if let Some(task) = execution.task() {
                    task.state().set_error_flag();
                    task.state().store(TaskState::ERROR);
                }
                self.release_execution(execution);
            }
        }
    }

    /// Tier placement: realtime queue if the remaining wait is within the
    /// smallest tier's threshold, otherwise the largest tier whose threshold
    /// is below the remaining wait.
    fn enqueue_waiting(&self, execution: Box<ExecutionEntry>) {
        let remaining = execution
            .last_step
            .saturating_duration_since(Instant::now());

        if self.tiers.is_empty() || remaining <= self.tiers[0].threshold {
            self.realtime_queue.push(execution);
            return;
        }

        // Linear search; the tier list is small.
        let mut target = 0;
        for (index, tier) in self.tiers.iter().enumerate().skip(1) {
            if remaining > tier.threshold {
                target = index;
            } else {
                break;
            }
        }
        self.tiers[target].queue.push(execution);
    }

    /// Non-blocking realtime hint: at most one thread at a time drains the
    /// realtime waiting queue and reprocesses the realtime condition queue.
    pub(crate) fn hint_realtime(&self) {
        let Some(_guard) = CasGuard::try_acquire(&self.realtime_scheduling) else {
            return;
        };
        self.realtime_schedule();
        self.process_condition_queue(WaitQueue::Realtime);
    }

    fn realtime_schedule(&self) {
        let cap = self.config.realtime_batch_cap;
        let mut batch = Vec::with_capacity(cap.min(64));
        while batch.len() < cap {
            match self.realtime_queue.pop() {
                Some(execution) => batch.push(execution),
                None => break,
            }
        }

        let now = Instant::now();
        for execution in batch {
            if execution.last_step <= now {
                self.request_execution(execution);
            } else {
                self.realtime_queue.push(execution);
            }
        }
    }

    /// Drain one condition-waiting queue, dispatching entries whose
    /// readiness predicate now holds and re-parking the rest. Pure polling;
    /// there is no wake-on-dependency-completion signal.
    fn process_condition_queue(&self, which: WaitQueue) {
        let Some(_guard) = CasGuard::try_acquire(&self.condition_processing) else {
            return;
        };

        let queue = match which {
            WaitQueue::Realtime => &self.wait_realtime,
            WaitQueue::ShortTerm => &self.wait_short_term,
            WaitQueue::LongTerm => &self.wait_long_term,
        };

        let mut buffer = Vec::with_capacity(queue.len() + 4);
        while let Some(execution) = queue.pop() {
            buffer.push(execution);
        }

        for execution in buffer {
            match execution.task() {
                Some(task) if task.is_ready() => self.dispatch_execution(execution),
                Some(_) => queue.push(execution),
                None => self.release_execution(execution),
            }
        }
    }

    /// One pass of a tier's scheduling thread: drain, partition into due-now
    /// and still-waiting (re-placed, possibly migrating tiers), dispatch the
    /// due entries.
    fn run_tier_pass(&self, tier_index: usize) {
        let tier = &self.tiers[tier_index];

        let mut drained = Vec::with_capacity(tier.queue.len() + 4);
        while let Some(execution) = tier.queue.pop() {
            drained.push(execution);
        }

        let now = Instant::now();
        let mut due = Vec::new();
        for execution in drained {
            if execution.last_step <= now {
                due.push(execution);
            } else {
                self.enqueue_waiting(execution);
            }
        }

        for execution in due {
            self.request_execution(execution);
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::Release);
        if let Some(registry) = self.registry.get() {
            for processor in &registry.processors {
                processor.pause();
            }
        }
        info!("scheduler paused");
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::Release);
        // Locked notify: tier threads re-check the flag under this lock and
        // then block in an untimed wait.
        self.pause_signal.notify_all_locked();
        if let Some(registry) = self.registry.get() {
            for processor in &registry.processors {
                processor.resume();
            }
        }
        info!("scheduler resumed");
    }

    fn on_frame(&self, frame_number: u64) {
        self.hint_realtime();
        self.process_condition_queue(WaitQueue::ShortTerm);

        if frame_number % LONG_TERM_FRAME_INTERVAL == 0 {
            self.process_condition_queue(WaitQueue::LongTerm);
        }
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            submitted_tasks: self.counters.submitted.load(Ordering::Relaxed),
            rejected_tasks: self.counters.rejected.load(Ordering::Relaxed),
            outstanding_entries: self.entry_pool.outstanding(),
            pooled_entries: self.entry_pool.pooled(),
        }
    }
}

/// Dedicated scheduling loop for one tier.
fn tier_thread_loop(core: &Arc<SchedulerCore>, tier_index: usize) {
    let threshold = core.tiers[tier_index].threshold;
    let budget = (threshold / 2).max(Duration::from_micros(1));
    debug!(tier = tier_index, ?threshold, "tier thread started");

    while core.running.load(Ordering::Acquire) {
        let start = Instant::now();

        if core.paused.load(Ordering::Acquire) {
            {
                let mut guard = core.pause_signal.lock();
                // Re-check under the lock; spurious wakeups fall through to
                // the outer loop which re-checks shutdown.
                if core.paused.load(Ordering::Acquire) && core.running.load(Ordering::Acquire) {
                    core.pause_signal.wait(&mut guard);
                }
            }
            thread::yield_now();
            continue;
        }

        core.run_tier_pass(tier_index);

        // Cheap readiness-poll heartbeat on the designated tiers.
        if tier_index == core.config.short_term_check_tier {
            core.process_condition_queue(WaitQueue::ShortTerm);
        } else if tier_index == core.config.long_term_check_tier {
            core.process_condition_queue(WaitQueue::LongTerm);
        }

        core.hint_realtime();

        // Sleep the remaining half-threshold budget; yield if it is spent.
        let elapsed = start.elapsed();
        if elapsed < budget {
            thread::sleep(budget - elapsed);
        } else {
            thread::yield_now();
        }
    }

    debug!(tier = tier_index, "tier thread exiting");
}

/// The scheduler orchestrator.
///
/// Owns the capability→processor registry, the delay-scheduling tiers, and
/// the condition-waiting queues; it is the single entry and re-entry point
/// for all task dispatch.
pub struct TaskManager {
    core: Arc<SchedulerCore>,
    subsystems: Vec<Box<dyn TaskSubsystem>>,
    tier_threads: Vec<JoinHandle<()>>,
    general_pool: Option<Arc<ThreadWorkerPool>>,
    initialized: bool,
}

impl TaskManager {
    /// Create a manager from a validated configuration. No threads are
    /// spawned until [`TaskManager::initialize`].
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConfig`] for invalid configuration.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        Ok(Self {
            core: Arc::new(SchedulerCore::new(config)),
            subsystems: Vec::new(),
            tier_threads: Vec::new(),
            general_pool: None,
            initialized: false,
        })
    }

    /// Attach a subsystem that will register specialized processors during
    /// initialization. Ignored after [`TaskManager::initialize`].
    pub fn attach_subsystem(&mut self, subsystem: Box<dyn TaskSubsystem>) {
        if self.initialized {
            warn!("subsystem attached after initialization; ignored");
            return;
        }
        self.subsystems.push(subsystem);
    }

    /// OR extra capability bits into the general mask used during
    /// resolution.
    pub fn add_general_capability(&self, capabilities: CapabilityMask) {
        self.core
            .general_capability
            .fetch_or(capabilities.bits(), Ordering::AcqRel);
    }

    /// Build the processor registry (general pool first, then subsystem
    /// processors), seal it, and spawn the per-tier scheduling threads.
    /// Must complete before steady-state dispatch begins.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::WorkerSpawn`] if the general pool or a tier
    /// thread cannot be created.
    pub fn initialize(&mut self) -> Result<(), SchedulerError> {
        if self.initialized {
            return Ok(());
        }

        let context = SubsystemContext::new(&self.core);
        for subsystem in &mut self.subsystems {
            subsystem.initialize(&context);
        }

        let general_pool = ThreadWorkerPool::new(
            Arc::downgrade(&self.core),
            CapabilityMask::GENERAL,
            self.core.config.idle_backoff(),
            None,
        );
        let requested = self.core.config.general_worker_count;
        let spawned = general_pool.spawn_workers(requested);
        if spawned < requested {
            general_pool.shutdown();
            return Err(SchedulerError::WorkerSpawn(std::io::Error::other(
                format!("general pool spawned {spawned} of {requested} workers"),
            )));
        }

        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::clone(&general_pool) as Arc<dyn TaskProcessor>);
        for subsystem in &mut self.subsystems {
            subsystem.create_processors(&context, &mut |processor| registry.register(processor));
        }
        if self.core.registry.set(registry).is_err() {
            warn!("capability registry was already sealed");
        }
        self.general_pool = Some(general_pool);

        self.core.paused.store(false, Ordering::Release);
        self.core.running.store(true, Ordering::Release);
        for tier_index in 0..self.core.tiers.len() {
            let core = Arc::clone(&self.core);
            let handle = thread::Builder::new()
                .name(format!("tier-sched-{tier_index}"))
                .spawn(move || tier_thread_loop(&core, tier_index))?;
            self.tier_threads.push(handle);
        }

        self.initialized = true;
        info!(
            tiers = self.core.tiers.len(),
            general_workers = requested,
            "task manager initialized"
        );
        Ok(())
    }

    /// Submit a task for asynchronous execution.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::NoCapableProcessor`] if no registered processor
    ///   satisfies the task's requirement even with the general mask OR'd
    ///   in; the task is force-transitioned to terminal error and its step
    ///   never runs.
    /// - [`SchedulerError::Shutdown`] if the manager is not running.
    pub fn execute_task(&self, task: Arc<dyn Task>) -> Result<(), SchedulerError> {
        self.core.execute_task(task)
    }

    /// Per-frame tick: realtime hint plus short-term readiness polling, and
    /// long-term polling every 8th frame.
    pub fn on_frame(&self, frame_number: u64) {
        self.core.on_frame(frame_number);
    }

    /// Background transition: stop tier threads and workers from starting
    /// new task steps. Steps already mid-flight complete.
    pub fn pause(&self) {
        self.core.pause();
    }

    /// Foreground transition: clear the pause flag and broadcast so every
    /// tier and worker resumes immediately rather than waiting out its own
    /// poll interval.
    pub fn resume(&self) {
        self.core.resume();
    }

    /// The general worker pool, available after initialization.
    #[must_use]
    pub fn general_pool(&self) -> Option<&Arc<ThreadWorkerPool>> {
        self.general_pool.as_ref()
    }

    /// Snapshot of scheduler bookkeeping.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.core.stats()
    }

    /// Stop tier threads, wind down every processor, and shut subsystems
    /// down. Also runs on drop.
    pub fn shutdown(&mut self) {
        if !self.core.running.swap(false, Ordering::AcqRel) && self.tier_threads.is_empty() {
            return;
        }

        self.core.paused.store(false, Ordering::Release);
        self.core.pause_signal.notify_all_locked();
        for handle in self.tier_threads.drain(..) {
            if handle.join().is_err() {
                warn!("tier thread panicked before join");
            }
        }

        if let Some(registry) = self.core.registry.get() {
            for processor in &registry.processors {
                processor.prepare_shutdown();
            }
        }

        for subsystem in &mut self.subsystems {
            subsystem.shutdown();
        }

        info!("task manager shut down");
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
