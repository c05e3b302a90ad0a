//! Per-subscription scheduling policy.
//!
//! `ScheduleOptions` is a small `Copy` value. Changing a policy means building
//! a new value with one of the `with_new_*` methods and handing it to the
//! scheduler, so a reader never observes a half-updated policy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduling priority of a subscription.
///
/// The loop currently invokes callbacks in registration order regardless of
/// priority; the value is carried so drivers can already declare intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePriority {
    #[default]
    Default,
    High,
}

impl fmt::Display for SchedulePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulePriority::Default => write!(f, "default"),
            SchedulePriority::High => write!(f, "high"),
        }
    }
}

/// Requested update interval and priority for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Milliseconds between invocations. `0` means "use the subscriber's default".
    update_interval_ms: u64,
    #[serde(default)]
    priority: SchedulePriority,
}

impl ScheduleOptions {
    /// Options with the given interval and default priority.
    pub const fn new(update_interval_ms: u64) -> Self {
        Self {
            update_interval_ms,
            priority: SchedulePriority::Default,
        }
    }

    pub const fn with_priority(update_interval_ms: u64, priority: SchedulePriority) -> Self {
        Self {
            update_interval_ms,
            priority,
        }
    }

    pub const fn update_interval_ms(&self) -> u64 {
        self.update_interval_ms
    }

    pub const fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub const fn priority(&self) -> SchedulePriority {
        self.priority
    }

    /// True when the interval is the "use default" sentinel.
    pub const fn uses_default_interval(&self) -> bool {
        self.update_interval_ms == 0
    }

    /// Copy of these options with a different interval.
    #[must_use]
    pub const fn with_new_update_interval(&self, update_interval_ms: u64) -> Self {
        Self {
            update_interval_ms,
            priority: self.priority,
        }
    }

    /// Copy of these options with a different priority.
    #[must_use]
    pub const fn with_new_priority(&self, priority: SchedulePriority) -> Self {
        Self {
            update_interval_ms: self.update_interval_ms,
            priority,
        }
    }
}

impl fmt::Display for ScheduleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms/{}", self.update_interval_ms, self.priority)
    }
}
