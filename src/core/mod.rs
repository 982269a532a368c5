//! Core scheduling machinery: task contract, capability routing, execution
//! entries, worker pools, and the manager that ties them together.

pub mod capability;
pub mod entry;
pub mod error;
pub mod manager;
pub mod processor;
pub mod subsystem;
pub mod task;
mod worker;
pub mod worker_pool;

pub use capability::CapabilityMask;
pub use entry::ExecutionEntry;
pub use error::SchedulerError;
pub use manager::{SchedulerStats, TaskManager};
pub use processor::{TaskProcessor, WorkerLifecycle};
pub use subsystem::{SubsystemContext, TaskSubsystem};
pub use task::{StepResult, Task, TaskPriority, TaskProperty, TaskState, TaskStateCell};
pub use worker_pool::ThreadWorkerPool;
