//! Loop counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated by the loop thread.
#[derive(Debug, Default)]
pub(crate) struct LoopStats {
    iterations: AtomicU64,
    overruns: AtomicU64,
    sync_invocations: AtomicU64,
    async_invocations: AtomicU64,
}

impl LoopStats {
    pub(crate) fn record_iteration(&self, overrun: bool) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if overrun {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_sync_invocation(&self) {
        self.sync_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_async_invocations(&self, count: usize) {
        self.async_invocations
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        sync_subscriptions: usize,
        async_subscriptions: usize,
        active_subscriptions: usize,
        report_interval: Duration,
        is_running: bool,
    ) -> SchedulerStats {
        SchedulerStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            sync_invocations: self.sync_invocations.load(Ordering::Relaxed),
            async_invocations: self.async_invocations.load(Ordering::Relaxed),
            sync_subscriptions,
            async_subscriptions,
            active_subscriptions,
            report_interval,
            is_running,
        }
    }
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Completed loop iterations since the scheduler was created.
    pub iterations: u64,
    /// Iterations whose callbacks took at least the report interval.
    pub overruns: u64,
    pub sync_invocations: u64,
    pub async_invocations: u64,
    pub sync_subscriptions: usize,
    pub async_subscriptions: usize,
    /// Subscriptions in either registry that are not suspended.
    pub active_subscriptions: usize,
    pub report_interval: Duration,
    pub is_running: bool,
}
