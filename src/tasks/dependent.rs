//! Tasks gated on the completion of other tasks.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{
    CapabilityMask, StepResult, Task, TaskPriority, TaskProperty, TaskStateCell,
};

/// Task whose readiness predicate is "all prerequisite tasks reached a
/// terminal state".
///
/// Until then it parks in a condition-waiting queue and is re-checked by the
/// readiness polls; it never occupies a worker. A prerequisite finishing in
/// error still counts as finished, and the closure decides what to do about
/// it. With no prerequisites this is a plain one-shot closure task.
pub struct DependentTask {
    state: TaskStateCell,
    priority: TaskPriority,
    property: TaskProperty,
    capabilities: CapabilityMask,
    prerequisites: Vec<Arc<dyn Task>>,
    work: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DependentTask {
    /// Wrap a closure that runs after every prerequisite finishes.
    pub fn new(
        prerequisites: Vec<Arc<dyn Task>>,
        work: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            state: TaskStateCell::new(),
            priority: TaskPriority::Default,
            property: TaskProperty::NONE,
            capabilities: CapabilityMask::GENERAL,
            prerequisites,
            work: Mutex::new(Some(Box::new(work))),
        }
    }

    /// Set the priority class; it also selects which condition-waiting queue
    /// polls this task's readiness.
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the producer-defined property tag.
    #[must_use]
    pub fn with_property(mut self, property: TaskProperty) -> Self {
        self.property = property;
        self
    }

    /// Set the capability requirement.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilityMask) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// True if any prerequisite ended in error.
    #[must_use]
    pub fn any_prerequisite_failed(&self) -> bool {
        self.prerequisites.iter().any(|task| task.has_error())
    }
}

impl Task for DependentTask {
    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn property(&self) -> TaskProperty {
        self.property
    }

    fn required_capabilities(&self) -> CapabilityMask {
        self.capabilities
    }

    fn state(&self) -> &TaskStateCell {
        &self.state
    }

    fn is_ready(&self) -> bool {
        self.prerequisites.iter().all(|task| task.is_finished())
    }

    fn step(&self) -> StepResult {
        // Readiness gating happens before dispatch; a step reached early
        // (e.g. direct invocation) re-parks instead of running.
        if !self.is_ready() {
            return StepResult::WaitCondition;
        }
        if let Some(work) = self.work.lock().take() {
            work();
        }
        StepResult::Finished
    }
}
