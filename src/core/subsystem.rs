//! Subsystem seam for registering specialized processors.
//!
//! Specialized backends (a render-thread executor, an IO pool) plug into the
//! manager by implementing [`TaskSubsystem`]; the manager drives their
//! lifecycle around registry construction.

use std::sync::Arc;

use crate::config::IdleBackoff;

use super::capability::CapabilityMask;
use super::manager::SchedulerCore;
use super::processor::{TaskProcessor, WorkerLifecycle};
use super::worker_pool::ThreadWorkerPool;

/// Handle subsystems use to create scheduler-backed resources during
/// initialization.
pub struct SubsystemContext<'a> {
    core: &'a Arc<SchedulerCore>,
}

impl<'a> SubsystemContext<'a> {
    pub(crate) fn new(core: &'a Arc<SchedulerCore>) -> Self {
        Self { core }
    }

    /// Create a worker pool wired back to the scheduler for delayed and
    /// condition-gated re-entry. The pool starts with zero workers so the
    /// subsystem can scale it once its execution precondition holds.
    #[must_use]
    pub fn new_worker_pool(&self, capability: CapabilityMask) -> Arc<ThreadWorkerPool> {
        ThreadWorkerPool::new(
            Arc::downgrade(self.core),
            capability,
            self.core.config().idle_backoff(),
            None,
        )
    }

    /// Like [`Self::new_worker_pool`], with per-thread lifecycle hooks so
    /// every worker can bind a thread-affine resource before taking jobs
    /// (binding a graphics context is the archetype).
    #[must_use]
    pub fn new_worker_pool_with_lifecycle(
        &self,
        capability: CapabilityMask,
        lifecycle: Arc<dyn WorkerLifecycle>,
    ) -> Arc<ThreadWorkerPool> {
        ThreadWorkerPool::new(
            Arc::downgrade(self.core),
            capability,
            self.core.config().idle_backoff(),
            Some(lifecycle),
        )
    }

    /// Worker idle-backoff schedule from the active configuration, for
    /// subsystems running their own worker loops.
    #[must_use]
    pub fn idle_backoff(&self) -> IdleBackoff {
        self.core.config().idle_backoff()
    }
}

/// A pluggable execution backend that contributes processors to the
/// capability registry.
pub trait TaskSubsystem: Send {
    /// Called once before the registry is built.
    fn initialize(&mut self, _context: &SubsystemContext<'_>) {}

    /// Register this subsystem's processors. Called exactly once, before the
    /// registry is sealed; `register` may be invoked any number of times.
    fn create_processors(
        &mut self,
        context: &SubsystemContext<'_>,
        register: &mut dyn FnMut(Arc<dyn TaskProcessor>),
    );

    /// Called during manager shutdown, after processors have been asked to
    /// wind down.
    fn shutdown(&mut self) {}
}
