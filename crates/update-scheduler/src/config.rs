//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Report interval used when no subscription is active (500 ms).
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 500;

/// Default name of the loop worker thread.
pub const DEFAULT_THREAD_NAME: &str = "update-scheduler";

/// What happens when a callback panics inside the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Log the fault and abort the process.
    #[default]
    Abort,
    /// Log the fault and let the loop end. `is_running` turns false.
    StopLoop,
}

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Interval used while no subscription is active, in milliseconds.
    pub default_report_interval_ms: u64,
    /// Start the loop when the first callback is scheduled.
    pub auto_start: bool,
    /// Name given to the loop worker thread.
    pub thread_name: String,
    /// Handling of callback panics.
    pub fault_policy: FaultPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            auto_start: true,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            fault_policy: FaultPolicy::Abort,
        }
    }
}

impl SchedulerConfig {
    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_default_report_interval_ms(mut self, interval_ms: u64) -> Self {
        self.default_report_interval_ms = interval_ms;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn default_report_interval(&self) -> Duration {
        Duration::from_millis(self.default_report_interval_ms)
    }

    /// Reject values the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.default_report_interval_ms == 0 {
            return Err(Error::invalid_argument(
                "default_report_interval_ms must be greater than zero",
            ));
        }
        if self.thread_name.is_empty() {
            return Err(Error::invalid_argument("thread_name must not be empty"));
        }
        Ok(())
    }
}
