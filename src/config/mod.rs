//! Scheduler configuration models.
//!
//! Every timing constant the scheduler uses — tier thresholds, idle backoff
//! steps, the realtime batch cap — encodes a latency/CPU tradeoff, so all of
//! them are configuration rather than hardcoded values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay-tier thresholds in milliseconds.
const DEFAULT_TIER_THRESHOLDS_MS: [u64; 5] = [2, 8, 32, 128, 1024];
/// Default worker count for the general pool.
const DEFAULT_GENERAL_WORKERS: usize = 4;
/// Default idle backoff steps in milliseconds.
const DEFAULT_IDLE_BACKOFF_MS: [u64; 3] = [2, 20, 200];
/// Default cap on entries drained per realtime-hint invocation.
const DEFAULT_REALTIME_BATCH_CAP: usize = 1024;
/// Default bounded capacity of the execution-entry recycling pool.
const DEFAULT_ENTRY_POOL_CAPACITY: usize = 256;

fn default_tier_thresholds() -> Vec<u64> {
    DEFAULT_TIER_THRESHOLDS_MS.to_vec()
}

fn default_general_workers() -> usize {
    DEFAULT_GENERAL_WORKERS
}

fn default_idle_backoff() -> Vec<u64> {
    DEFAULT_IDLE_BACKOFF_MS.to_vec()
}

fn default_realtime_batch_cap() -> usize {
    DEFAULT_REALTIME_BATCH_CAP
}

fn default_entry_pool_capacity() -> usize {
    DEFAULT_ENTRY_POOL_CAPACITY
}

fn default_short_term_tier() -> usize {
    1
}

fn default_long_term_tier() -> usize {
    3
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum-wait threshold of each delay tier, in milliseconds. Sorted
    /// ascending at validation; one dedicated scheduling thread runs per
    /// tier.
    #[serde(default = "default_tier_thresholds")]
    pub tier_thresholds_ms: Vec<u64>,
    /// Worker threads in the general pool.
    #[serde(default = "default_general_workers")]
    pub general_worker_count: usize,
    /// Idle backoff delays for workers, in milliseconds, applied as the
    /// no-work streak grows; the last step caps the backoff.
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: Vec<u64>,
    /// Maximum entries drained per realtime-hint invocation.
    #[serde(default = "default_realtime_batch_cap")]
    pub realtime_batch_cap: usize,
    /// Bounded capacity of the execution-entry recycling pool.
    #[serde(default = "default_entry_pool_capacity")]
    pub entry_pool_capacity: usize,
    /// Tier index whose scheduling thread also polls the short-term
    /// condition-waiting queue.
    #[serde(default = "default_short_term_tier")]
    pub short_term_check_tier: usize,
    /// Tier index whose scheduling thread also polls the long-term
    /// condition-waiting queue.
    #[serde(default = "default_long_term_tier")]
    pub long_term_check_tier: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tier_thresholds_ms: default_tier_thresholds(),
            general_worker_count: default_general_workers(),
            idle_backoff_ms: default_idle_backoff(),
            realtime_batch_cap: default_realtime_batch_cap(),
            entry_pool_capacity: default_entry_pool_capacity(),
            short_term_check_tier: default_short_term_tier(),
            long_term_check_tier: default_long_term_tier(),
        }
    }
}

impl SchedulerConfig {
    /// Default configuration with the general pool sized to the host's CPU
    /// count (clamped to a sane range for an application loop).
    #[must_use]
    pub fn scaled_to_cpus() -> Self {
        Self {
            general_worker_count: num_cpus::get().clamp(2, 8),
            ..Self::default()
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.tier_thresholds_ms.is_empty() {
            return Err("tier_thresholds_ms must not be empty".into());
        }
        if self.tier_thresholds_ms.contains(&0) {
            return Err("tier thresholds must be greater than 0".into());
        }
        if self.idle_backoff_ms.is_empty() {
            // An empty schedule would leave idle workers busy-spinning on
            // yield_now.
            return Err("idle_backoff_ms must not be empty".into());
        }
        if self.realtime_batch_cap == 0 {
            return Err("realtime_batch_cap must be greater than 0".into());
        }
        if self.entry_pool_capacity == 0 {
            return Err("entry_pool_capacity must be greater than 0".into());
        }
        let tier_count = self.tier_thresholds_ms.len();
        if self.short_term_check_tier >= tier_count {
            return Err(format!(
                "short_term_check_tier {} out of range for {tier_count} tiers",
                self.short_term_check_tier
            ));
        }
        if self.long_term_check_tier >= tier_count {
            return Err(format!(
                "long_term_check_tier {} out of range for {tier_count} tiers",
                self.long_term_check_tier
            ));
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it.
    ///
    /// # Errors
    ///
    /// Returns a message for parse failures or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Tier thresholds as durations, sorted ascending.
    #[must_use]
    pub fn tier_thresholds(&self) -> Vec<Duration> {
        let mut thresholds: Vec<Duration> = self
            .tier_thresholds_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        thresholds.sort_unstable();
        thresholds
    }

    /// Resolved idle-backoff schedule for worker threads.
    #[must_use]
    pub fn idle_backoff(&self) -> IdleBackoff {
        IdleBackoff {
            steps: self
                .idle_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

/// Tiered idle-backoff schedule for worker threads.
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    steps: Vec<Duration>,
}

impl IdleBackoff {
    /// Delay to apply for the given consecutive no-work streak.
    ///
    /// The first idle pass gets no delay (cooperative yield instead); later
    /// passes walk the configured steps and then stay capped at the last one.
    #[must_use]
    pub fn delay_for(&self, no_work_streak: u32) -> Option<Duration> {
        if no_work_streak <= 1 || self.steps.is_empty() {
            return None;
        }
        let index = (no_work_streak as usize - 2).min(self.steps.len() - 1);
        Some(self.steps[index])
    }
}
