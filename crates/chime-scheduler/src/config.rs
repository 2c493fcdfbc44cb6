//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Delay before retrying the load step when the heap is empty.
pub const DEFAULT_FALLBACK_RELOAD: Duration = Duration::from_secs(60);

/// Largest delay a single armed timer may carry. Longer waits are re-armed.
pub const DEFAULT_MAX_TIMER_DELAY: Duration = Duration::from_millis(i32::MAX as u64);

/// Consecutive execution failures before a task is marked failed.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Capacity of the engine's command channel.
pub const DEFAULT_COMMAND_BUFFER: usize = 100;

/// Tunables for [`crate::ReminderEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fallback_reload_interval: Duration,
    pub max_timer_delay: Duration,
    pub failure_threshold: u32,
    pub command_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_reload_interval: DEFAULT_FALLBACK_RELOAD,
            max_timer_delay: DEFAULT_MAX_TIMER_DELAY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            command_buffer: DEFAULT_COMMAND_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Reject settings the dispatch loop cannot work with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.fallback_reload_interval.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "fallback_reload_interval must be non-zero".to_string(),
            ));
        }
        if self.max_timer_delay.is_zero() {
            return Err(SchedulerError::InvalidConfig(
                "max_timer_delay must be non-zero".to_string(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(SchedulerError::InvalidConfig(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(SchedulerError::InvalidConfig(
                "command_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
