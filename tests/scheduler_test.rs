//! Integration tests for the task manager: capability routing, sleep and
//! yield re-entry, condition waiting, pause/resume, and entry accounting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use tier_scheduler::config::SchedulerConfig;
use tier_scheduler::core::{
    CapabilityMask, StepResult, SubsystemContext, Task, TaskManager, TaskPriority, TaskProcessor,
    TaskState, TaskStateCell, TaskSubsystem, ThreadWorkerPool,
};
use tier_scheduler::tasks::DependentTask;

/// Test task that follows a scripted sequence of step results and records
/// where it ran.
struct ProbeTask {
    state: TaskStateCell,
    capabilities: CapabilityMask,
    priority: TaskPriority,
    script: Mutex<VecDeque<StepResult>>,
    steps: AtomicU32,
    thread_names: Mutex<Vec<String>>,
}

impl ProbeTask {
    fn new(capabilities: CapabilityMask, script: Vec<StepResult>) -> Arc<Self> {
        Arc::new(Self {
            state: TaskStateCell::new(),
            capabilities,
            priority: TaskPriority::Default,
            script: Mutex::new(script.into()),
            steps: AtomicU32::new(0),
            thread_names: Mutex::new(Vec::new()),
        })
    }

    fn steps(&self) -> u32 {
        self.steps.load(Ordering::Acquire)
    }

    fn ran_on_thread_prefix(&self, prefix: &str) -> bool {
        self.thread_names
            .lock()
            .iter()
            .all(|name| name.starts_with(prefix))
    }
}

impl Task for ProbeTask {
    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn required_capabilities(&self) -> CapabilityMask {
        self.capabilities
    }

    fn state(&self) -> &TaskStateCell {
        &self.state
    }

    fn step(&self) -> StepResult {
        self.steps.fetch_add(1, Ordering::AcqRel);
        let name = thread::current().name().unwrap_or("<unnamed>").to_string();
        self.thread_names.lock().push(name);
        self.script.lock().pop_front().unwrap_or(StepResult::Finished)
    }
}

/// Poll until the predicate holds or the timeout elapses.
fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// Fast configuration so tests stay snappy.
fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        tier_thresholds_ms: vec![2, 8],
        general_worker_count: 2,
        idle_backoff_ms: vec![1, 2, 5],
        short_term_check_tier: 0,
        long_term_check_tier: 1,
        ..SchedulerConfig::default()
    }
}

fn started_manager() -> TaskManager {
    let mut manager = TaskManager::new(test_config()).expect("valid config");
    manager.initialize().expect("initialize");
    manager
}

/// Subsystem registering one specialized worker pool.
struct PoolSubsystem {
    capability: CapabilityMask,
    workers: usize,
    pool: Arc<Mutex<Option<Arc<ThreadWorkerPool>>>>,
}

impl TaskSubsystem for PoolSubsystem {
    fn create_processors(
        &mut self,
        context: &SubsystemContext<'_>,
        register: &mut dyn FnMut(Arc<dyn TaskProcessor>),
    ) {
        let pool = context.new_worker_pool(self.capability);
        let spawned = pool.spawn_workers(self.workers);
        assert_eq!(spawned, self.workers);
        *self.pool.lock() = Some(Arc::clone(&pool));
        register(pool);
    }
}

#[test]
fn general_task_runs_to_completion() {
    let manager = started_manager();
    let task = ProbeTask::new(CapabilityMask::GENERAL, vec![StepResult::Finished]);

    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .expect("general submission always succeeds");

    assert!(wait_until(Duration::from_secs(2), || task.is_finished()));
    assert!(!task.has_error());
    assert_eq!(task.steps(), 1);
    assert!(task.state().load().contains(TaskState::DONE));
    assert_eq!(manager.stats().submitted_tasks, 1);
}

#[test]
fn unsatisfiable_capability_is_rejected_terminally() {
    let manager = started_manager();
    let task = ProbeTask::new(CapabilityMask::from_bits(0x2), vec![StepResult::Finished]);

    let result = manager.execute_task(Arc::clone(&task) as Arc<dyn Task>);
    assert!(result.is_err());

    // Terminal error without a single step executed.
    assert!(task.is_finished());
    assert!(task.has_error());
    assert_eq!(task.steps(), 0);
    assert_eq!(manager.stats().rejected_tasks, 1);
    assert_eq!(manager.stats().outstanding_entries, 0);
}

#[test]
fn tasks_route_to_matching_pool() {
    let slot = Arc::new(Mutex::new(None));
    let mut manager = TaskManager::new(test_config()).expect("valid config");
    manager.attach_subsystem(Box::new(PoolSubsystem {
        capability: CapabilityMask::GRAPHICS,
        workers: 1,
        pool: Arc::clone(&slot),
    }));
    manager.initialize().expect("initialize");

    let graphics = ProbeTask::new(CapabilityMask::GRAPHICS, vec![StepResult::Finished]);
    let general = ProbeTask::new(CapabilityMask::GENERAL, vec![StepResult::Finished]);

    manager
        .execute_task(Arc::clone(&graphics) as Arc<dyn Task>)
        .unwrap();
    manager
        .execute_task(Arc::clone(&general) as Arc<dyn Task>)
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        graphics.is_finished() && general.is_finished()
    }));

    // Worker threads are named after their pool's capability bits.
    assert!(graphics.ran_on_thread_prefix("tier-worker-1-"));
    assert!(general.ran_on_thread_prefix("tier-worker-0-"));
}

#[test]
fn general_capability_widens_resolution() {
    let manager = started_manager();
    let task = ProbeTask::new(CapabilityMask::from_bits(0x2), vec![StepResult::Finished]);

    assert!(manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .is_err());

    // After widening the general mask the same requirement resolves to the
    // general pool.
    manager.add_general_capability(CapabilityMask::from_bits(0x2));
    let task = ProbeTask::new(CapabilityMask::from_bits(0x2), vec![StepResult::Finished]);
    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .expect("resolvable after widening");
    assert!(wait_until(Duration::from_secs(2), || task.is_finished()));
    assert!(!task.has_error());
}

#[test]
fn sleep_delays_reexecution() {
    let manager = started_manager();
    let delay = Duration::from_millis(50);
    let task = ProbeTask::new(
        CapabilityMask::GENERAL,
        vec![StepResult::Sleep(delay), StepResult::Finished],
    );

    let start = Instant::now();
    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .unwrap();
    assert!(wait_until(Duration::from_secs(3), || task.is_finished()));
    let elapsed = start.elapsed();

    assert_eq!(task.steps(), 2);
    assert!(elapsed >= delay, "woke early after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(1), "woke far too late: {elapsed:?}");
}

#[test]
fn sleep_over_default_tiers_wakes_within_one_threshold() {
    let mut manager = TaskManager::new(SchedulerConfig {
        general_worker_count: 2,
        idle_backoff_ms: vec![1, 2, 5],
        ..SchedulerConfig::default()
    })
    .expect("valid config");
    manager.initialize().expect("initialize");

    // With thresholds [2, 8, 32, 128, 1024] ms a 50 ms sleep parks in the
    // 32 ms tier, whose thread wakes roughly every 16 ms; the task must run
    // at 50 ms plus a bounded slack, nowhere near the next tier's cadence.
    let delay = Duration::from_millis(50);
    let task = ProbeTask::new(
        CapabilityMask::GENERAL,
        vec![StepResult::Sleep(delay), StepResult::Finished],
    );

    let start = Instant::now();
    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .unwrap();
    assert!(wait_until(Duration::from_secs(3), || task.is_finished()));
    let elapsed = start.elapsed();

    assert_eq!(task.steps(), 2);
    assert!(elapsed >= delay, "woke early after {elapsed:?}");
    assert!(
        elapsed < Duration::from_millis(150),
        "tier placement overslept: {elapsed:?}"
    );
}

#[test]
fn yield_reattempts_promptly() {
    let manager = started_manager();
    let task = ProbeTask::new(
        CapabilityMask::GENERAL,
        vec![StepResult::Yield, StepResult::Yield, StepResult::Finished],
    );

    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .unwrap();
    assert!(wait_until(Duration::from_millis(500), || task.is_finished()));
    assert_eq!(task.steps(), 3);
}

#[test]
fn condition_gated_task_waits_for_prerequisite() {
    let manager = started_manager();
    let prerequisite = ProbeTask::new(
        CapabilityMask::GENERAL,
        vec![StepResult::Sleep(Duration::from_millis(30)), StepResult::Finished],
    );

    let gate = Arc::clone(&prerequisite);
    let dependent = Arc::new(DependentTask::new(
        vec![Arc::clone(&prerequisite) as Arc<dyn Task>],
        move || assert!(gate.is_finished()),
    ));

    // Submit the dependent first so it parks before its prerequisite runs.
    manager
        .execute_task(Arc::clone(&dependent) as Arc<dyn Task>)
        .unwrap();
    manager
        .execute_task(Arc::clone(&prerequisite) as Arc<dyn Task>)
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || dependent.is_finished()));
    assert!(!dependent.has_error());
}

#[test]
fn background_priority_waits_in_long_term_queue() {
    let manager = started_manager();
    let prerequisite = ProbeTask::new(CapabilityMask::GENERAL, vec![StepResult::Finished]);
    let dependent = Arc::new(
        DependentTask::new(vec![Arc::clone(&prerequisite) as Arc<dyn Task>], || {})
            .with_priority(TaskPriority::Background),
    );

    manager
        .execute_task(Arc::clone(&dependent) as Arc<dyn Task>)
        .unwrap();
    manager
        .execute_task(Arc::clone(&prerequisite) as Arc<dyn Task>)
        .unwrap();

    // Drive frame ticks as a host loop would; the long-term queue is polled
    // every 8th frame.
    let mut frame = 0_u64;
    assert!(wait_until(Duration::from_secs(3), || {
        frame += 1;
        manager.on_frame(frame);
        dependent.is_finished()
    }));
}

#[test]
fn pause_stops_new_steps_until_resume() {
    let manager = started_manager();
    manager.pause();
    // Let workers reach their pause parking before submitting.
    thread::sleep(Duration::from_millis(50));

    let task = ProbeTask::new(CapabilityMask::GENERAL, vec![StepResult::Finished]);
    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(task.steps(), 0, "paused scheduler must not start steps");
    assert!(!task.is_finished());

    manager.resume();
    assert!(wait_until(Duration::from_secs(2), || task.is_finished()));
    assert_eq!(task.steps(), 1);
}

#[test]
fn entries_return_to_pool_after_completion() {
    let manager = started_manager();
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            ProbeTask::new(
                CapabilityMask::GENERAL,
                vec![StepResult::Yield, StepResult::Finished],
            )
        })
        .collect();
    for task in &tasks {
        manager
            .execute_task(Arc::clone(task) as Arc<dyn Task>)
            .unwrap();
    }

    assert!(wait_until(Duration::from_secs(3), || {
        tasks.iter().all(|task| task.is_finished())
    }));
    assert!(wait_until(Duration::from_secs(1), || {
        manager.stats().outstanding_entries == 0
    }));
    assert_eq!(manager.stats().submitted_tasks, 16);
}

#[test]
fn rapid_pause_resume_cycles_stay_live() {
    let manager = started_manager();

    // Hammer the pause handshake; a lost resume wakeup would leave a tier
    // or worker thread parked and the final task would never run.
    for cycle in 0..300_u32 {
        manager.pause();
        if cycle % 3 == 0 {
            thread::sleep(Duration::from_micros(200));
        }
        manager.resume();
    }

    let task = ProbeTask::new(
        CapabilityMask::GENERAL,
        vec![
            StepResult::Sleep(Duration::from_millis(5)),
            StepResult::Finished,
        ],
    );
    manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(3), || task.is_finished()),
        "a pause/resume cycle lost a wakeup"
    );
}

#[test]
fn shutdown_while_paused_joins_promptly() {
    let mut manager = started_manager();
    manager.pause();
    // Let tier and worker threads actually park in their pause waits.
    thread::sleep(Duration::from_millis(30));

    let handle = thread::spawn(move || manager.shutdown());
    assert!(
        wait_until(Duration::from_secs(5), || handle.is_finished()),
        "shutdown stalled with threads parked in pause waits"
    );
    handle.join().unwrap();
}

#[test]
fn shutdown_is_idempotent_and_rejects_late_submissions() {
    let mut manager = started_manager();
    manager.shutdown();
    manager.shutdown();

    let task = ProbeTask::new(CapabilityMask::GENERAL, vec![StepResult::Finished]);
    assert!(manager
        .execute_task(Arc::clone(&task) as Arc<dyn Task>)
        .is_err());
    assert_eq!(task.steps(), 0);
}

#[test]
fn invalid_config_is_rejected() {
    let config = SchedulerConfig {
        tier_thresholds_ms: vec![],
        ..SchedulerConfig::default()
    };
    assert!(TaskManager::new(config).is_err());
}
