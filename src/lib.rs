//! # Tier Scheduler
//!
//! A capability-routed, multi-tier task scheduler designed to live inside a
//! real-time application loop (a game frame loop, a simulation tick, an
//! interactive renderer).
//!
//! Tasks are small polymorphic units of work that execute in steps; between
//! steps a task can finish, yield for an immediate re-attempt, sleep for a
//! requested delay, or park until a readiness condition holds. The scheduler
//! routes each task to an execution backend by capability bitmask, tracks
//! its lifecycle through an atomic state bitmask, and keeps timing work off
//! the frame thread with dedicated per-tier scheduling threads.
//!
//! ## Key Features
//!
//! - **Capability Routing**: tasks declare required capability bits; the
//!   manager resolves the registered processor whose mask best matches,
//!   preferring exact matches and breaking ties by registration order
//! - **Delay Tiers**: sleeping tasks park in coarse-grained timing buckets,
//!   each serviced by its own thread, so a long sleep never costs per-task
//!   timer precision
//! - **Realtime Hint Path**: submissions and frame ticks opportunistically
//!   drain the near-due queue without waiting for a tier thread
//! - **Condition Waiting**: tasks gated on external dependencies wait in
//!   priority-segregated queues polled at matching cadences
//! - **Pause/Resume**: the whole scheduler suspends for background
//!   transitions without tearing down threads
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tier_scheduler::config::SchedulerConfig;
//! use tier_scheduler::core::TaskManager;
//! use tier_scheduler::tasks::AsyncValueTask;
//!
//! let mut manager = TaskManager::new(SchedulerConfig::scaled_to_cpus())?;
//! manager.initialize()?;
//!
//! let task = Arc::new(AsyncValueTask::new(|| expensive_computation()));
//! manager.execute_task(task.clone())?;
//!
//! // Later, from the frame loop:
//! manager.on_frame(frame_number);
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling machinery: tasks, capability routing, pools, the manager.
pub mod core;
/// Configuration models for tiers, workers, and timing constants.
pub mod config;
/// Ready-made task implementations.
pub mod tasks;
/// Shared utilities.
pub mod util;
