//! Task contract: atomic state bitmask, step results, and the `Task` trait.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use super::capability::CapabilityMask;

/// Additive, one-directional task state flags.
///
/// Bits are only ever set (never cleared except the transient
/// [`TaskState::PROCESSING`] bit), so any observer sees a monotonic
/// progression: none → queued → queued|started → queued|started|processing →
/// started|finished, with the error bit OR-able at any point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskState(u32);

impl TaskState {
    /// No state bits set; the task has not entered the scheduler.
    pub const NONE: Self = Self(0);
    /// An error was flagged during execution or dispatch.
    pub const HAS_ERROR: Self = Self(0x1);
    /// The task has been accepted and is queued somewhere in the scheduler.
    pub const QUEUED: Self = Self(0x10);
    /// `on_before_process` has run; the first step has been reached.
    pub const STARTED: Self = Self(0x20);
    /// A worker is currently inside the task's step.
    pub const PROCESSING: Self = Self(0x40);
    /// The task reported a terminal result.
    pub const FINISHED: Self = Self(0x80);

    /// Started but parked again between steps.
    pub const CONTINUE_WAITING: Self = Self(Self::QUEUED.0 | Self::STARTED.0);
    /// Terminal success.
    pub const DONE: Self = Self(Self::STARTED.0 | Self::FINISHED.0);
    /// Terminal failure.
    pub const ERROR: Self = Self(Self::STARTED.0 | Self::FINISHED.0 | Self::HAS_ERROR.0);

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `flags` is set.
    #[must_use]
    pub const fn contains(self, flags: Self) -> bool {
        self.0 & flags.0 == flags.0
    }
}

/// Atomic holder for a task's state bitmask.
///
/// Every [`Task`] implementation owns one of these and returns it from
/// [`Task::state`]; the scheduler drives all transitions through it.
#[derive(Debug, Default)]
pub struct TaskStateCell(AtomicU32);

impl TaskStateCell {
    /// New cell in the [`TaskState::NONE`] state.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Current state snapshot.
    #[must_use]
    pub fn load(&self) -> TaskState {
        TaskState(self.0.load(Ordering::Acquire))
    }

    /// Overwrite the state. Only the single worker currently driving the
    /// task may call this; concurrent writers must use [`Self::mark`] or
    /// [`Self::set_error_flag`].
    pub fn store(&self, state: TaskState) {
        self.0.store(state.0, Ordering::Release);
    }

    /// OR the given flags into the state.
    pub fn mark(&self, flags: TaskState) {
        self.0.fetch_or(flags.0, Ordering::AcqRel);
    }

    /// Clear the transient processing bit without disturbing flags set
    /// concurrently (such as the error bit).
    pub(crate) fn clear_processing(&self) {
        self.0.fetch_and(!TaskState::PROCESSING.0, Ordering::AcqRel);
    }

    /// Set the error bit with a compare-and-swap retry loop so concurrently
    /// applied state bits are never clobbered.
    pub fn set_error_flag(&self) {
        let mut stored = self.0.load(Ordering::Acquire);
        loop {
            let flagged = stored | TaskState::HAS_ERROR.0;
            match self
                .0
                .compare_exchange_weak(stored, flagged, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => stored = actual,
            }
        }
    }

    /// True once the task reached a terminal result.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.load().contains(TaskState::FINISHED)
    }

    /// True if the error bit has been flagged.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.load().contains(TaskState::HAS_ERROR)
    }
}

/// Priority class choosing the condition-waiting queue a not-yet-ready task
/// is parked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    /// Ordinary work; short-term readiness polling.
    #[default]
    Default,
    /// Latency-insensitive work; long-term readiness polling.
    Background,
    /// Near-frame work; realtime readiness polling.
    HighPriority,
}

/// Opaque property tag a producer may attach to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskProperty(u32);

impl TaskProperty {
    /// No property tag.
    pub const NONE: Self = Self(0);

    /// Create a tag from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit representation.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }
}

/// Outcome of a single task step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The task is done; release it.
    Finished,
    /// Re-queue for an immediate re-attempt on the same processor.
    Yield,
    /// Re-dispatch no earlier than the given delay from now.
    Sleep(Duration),
    /// Park until the task's readiness predicate holds.
    WaitCondition,
}

impl StepResult {
    /// Sleep for `delay`, coercing a zero delay to [`StepResult::Yield`].
    #[must_use]
    pub const fn sleep(delay: Duration) -> Self {
        if delay.is_zero() {
            Self::Yield
        } else {
            Self::Sleep(delay)
        }
    }
}

/// Polymorphic unit of asynchronous work.
///
/// A task is shared between its submitter and the execution entry wrapping
/// it, and its step callbacks run strictly sequentially but possibly on
/// different worker threads across re-entries. Implementations therefore
/// take `&self` and keep mutable work state behind interior mutability.
pub trait Task: Send + Sync {
    /// Priority class used for condition-waiting queue placement.
    fn priority(&self) -> TaskPriority {
        TaskPriority::Default
    }

    /// Producer-defined property tag.
    fn property(&self) -> TaskProperty {
        TaskProperty::NONE
    }

    /// Capability bits a processor must advertise to run this task.
    fn required_capabilities(&self) -> CapabilityMask {
        CapabilityMask::GENERAL
    }

    /// The task's state cell; the scheduler drives transitions through it.
    fn state(&self) -> &TaskStateCell;

    /// Readiness predicate gating dispatch, independent of time delays.
    /// Override to wait on external dependencies.
    fn is_ready(&self) -> bool {
        true
    }

    /// Run one step of the task's work.
    ///
    /// Steps across [`StepResult::Yield`]/[`StepResult::Sleep`]/
    /// [`StepResult::WaitCondition`] re-entries must be idempotent to
    /// re-invocation; the scheduler never calls `step` again after a
    /// terminal result.
    fn step(&self) -> StepResult;

    /// Hook before the first step of the task.
    fn on_before_process(&self) {}

    /// Hook before every step.
    fn on_before_step(&self) {}

    /// Hook after every step.
    fn on_after_step(&self) {}

    /// Hook after the task finished (before terminal state is stored).
    fn on_after_process(&self) {}

    /// True once the task reached a terminal result.
    fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// True if the error bit has been flagged.
    fn has_error(&self) -> bool {
        self.state().has_error()
    }
}
