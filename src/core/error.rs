//! Error types for scheduler operations.

use thiserror::Error;

use super::capability::CapabilityMask;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No registered processor's capability mask satisfies the requirement.
    #[error("no processor satisfies capability {0}")]
    NoCapableProcessor(CapabilityMask),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// OS thread creation failed while building a worker or tier thread.
    #[error("failed to spawn thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
    /// The manager has already been shut down.
    #[error("scheduler is shut down")]
    Shutdown,
}
