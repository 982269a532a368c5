//! Value-producing tasks.
//!
//! [`AsyncValueTask`] runs a closure once and stores its result for the
//! submitter to collect through the [`AsyncValue`] read side.
//! [`DependentValueTask`] additionally waits for an upstream value before
//! running, so value computations can be chained.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{
    CapabilityMask, StepResult, Task, TaskPriority, TaskProperty, TaskStateCell,
};

/// Default polling interval while a dependent task waits for its input.
const DEFAULT_WAIT: Duration = Duration::from_millis(16);

/// Read side of an asynchronously produced value.
pub trait AsyncValue<V>: Send + Sync {
    /// True once the value has been produced and not yet taken.
    fn has_value(&self) -> bool;

    /// Take the produced value. `None` until produced, or after it has
    /// already been taken.
    fn take_value(&self) -> Option<V>;
}

/// One-shot task that runs a closure and keeps its result.
pub struct AsyncValueTask<V> {
    state: TaskStateCell,
    priority: TaskPriority,
    property: TaskProperty,
    capabilities: CapabilityMask,
    work: Mutex<Option<Box<dyn FnOnce() -> V + Send>>>,
    value: Mutex<Option<V>>,
}

impl<V: Send + 'static> AsyncValueTask<V> {
    /// Wrap a closure producing a value.
    pub fn new(work: impl FnOnce() -> V + Send + 'static) -> Self {
        Self {
            state: TaskStateCell::new(),
            priority: TaskPriority::Default,
            property: TaskProperty::NONE,
            capabilities: CapabilityMask::GENERAL,
            work: Mutex::new(Some(Box::new(work))),
            value: Mutex::new(None),
        }
    }

    /// Set the priority class.
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
}

impl<V: Send + 'static> Task for AsyncValueTask<V> {
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

    fn step(&self) -> StepResult {
        let Some(work) = self.work.lock().take() else {
            return StepResult::Finished;
        };
        let value = work();
        *self.value.lock() = Some(value);
        StepResult::Finished
    }
}

impl<V: Send + 'static> AsyncValue<V> for AsyncValueTask<V> {
    fn has_value(&self) -> bool {
        self.value.lock().is_some()
    }

    fn take_value(&self) -> Option<V> {
        self.value.lock().take()
    }
}

/// Task that waits for an upstream [`AsyncValue`] and then computes its own
/// value from it.
///
/// Waiting is polling by sleep re-entry, not wake-on-completion; the wait
/// interval is configurable through [`DependentValueTask::with_wait`].
pub struct DependentValueTask<I, V> {
    state: TaskStateCell,
    priority: TaskPriority,
    property: TaskProperty,
    capabilities: CapabilityMask,
    source: Arc<dyn AsyncValue<I>>,
    work: Mutex<Option<Box<dyn FnOnce(I) -> V + Send>>>,
    value: Mutex<Option<V>>,
    wait_result: StepResult,
}

impl<I: Send + 'static, V: Send + 'static> DependentValueTask<I, V> {
    /// Wrap a closure computing a value from an upstream one.
    pub fn new(
        source: Arc<dyn AsyncValue<I>>,
        work: impl FnOnce(I) -> V + Send + 'static,
    ) -> Self {
        Self {
            state: TaskStateCell::new(),
            priority: TaskPriority::Default,
            property: TaskProperty::NONE,
            capabilities: CapabilityMask::GENERAL,
            source,
            work: Mutex::new(Some(Box::new(work))),
            value: Mutex::new(None),
            wait_result: StepResult::Sleep(DEFAULT_WAIT),
        }
    }

    /// Set the priority class.
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

    /// Set the step result returned while the upstream value is missing.
    /// A terminal result makes no sense here, so `Finished` (and a zero
    /// sleep) coerce to `Yield`.
    #[must_use]
    pub fn with_wait(mut self, wait: StepResult) -> Self {
        self.wait_result = match wait {
            StepResult::Finished => StepResult::Yield,
            StepResult::Sleep(delay) => StepResult::sleep(delay),
            other => other,
        };
        self
    }
}

impl<I: Send + 'static, V: Send + 'static> Task for DependentValueTask<I, V> {
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

    fn step(&self) -> StepResult {
        if !self.source.has_value() {
            return self.wait_result;
        }
        let Some(input) = self.source.take_value() else {
            // Lost a take race with another consumer of the same source.
            return self.wait_result;
        };
        let Some(work) = self.work.lock().take() else {
            return StepResult::Finished;
        };
        *self.value.lock() = Some(work(input));
        StepResult::Finished
    }
}

impl<I: Send + 'static, V: Send + 'static> AsyncValue<V> for DependentValueTask<I, V> {
    fn has_value(&self) -> bool {
        self.value.lock().is_some()
    }

    fn take_value(&self) -> Option<V> {
        self.value.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_task_produces_once() {
        let task = AsyncValueTask::new(|| 21 * 2);
        assert!(!task.has_value());

        assert_eq!(task.step(), StepResult::Finished);
        assert!(task.has_value());
        assert_eq!(task.take_value(), Some(42));
        assert!(!task.has_value());

        // A re-invocation after the closure ran is a no-op.
        assert_eq!(task.step(), StepResult::Finished);
        assert_eq!(task.take_value(), None);
    }

    #[test]
    fn dependent_task_waits_then_computes() {
        let source = Arc::new(AsyncValueTask::new(|| 10_u32));
        let dependent =
            DependentValueTask::new(Arc::clone(&source) as Arc<dyn AsyncValue<u32>>, |n| n + 1);

        assert_eq!(dependent.step(), StepResult::Sleep(DEFAULT_WAIT));

        source.step();
        assert_eq!(dependent.step(), StepResult::Finished);
        assert_eq!(dependent.take_value(), Some(11));
    }

    #[test]
    fn wait_result_coercions() {
        let source = Arc::new(AsyncValueTask::new(|| 0_u8));
        let dependent = DependentValueTask::new(source as Arc<dyn AsyncValue<u8>>, |n| n)
            .with_wait(StepResult::Finished);
        assert_eq!(dependent.step(), StepResult::Yield);

        let source = Arc::new(AsyncValueTask::new(|| 0_u8));
        let dependent = DependentValueTask::new(source as Arc<dyn AsyncValue<u8>>, |n| n)
            .with_wait(StepResult::Sleep(Duration::ZERO));
        assert_eq!(dependent.step(), StepResult::Yield);
    }
}
