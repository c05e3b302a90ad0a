//! Scheduler core.
//!
//! The `Scheduler` multiplexes many periodic callbacks onto one background
//! loop. The loop wakes once per report interval, the minimum interval
//! requested by any active subscription, and invokes every active callback in
//! registration order.
//!
//! # Locking
//!
//! - Each registry has its own mutex. The loop holds it only long enough to
//!   take a snapshot, so callbacks may call back into the scheduler.
//! - Mutating operations serialise on a control lock so that a registry
//!   change and the interval recompute that follows it are atomic.
//! - The report interval is an atomic read by the loop once per iteration.
//!   A change takes effect at the loop's next wake-up.
//! - A loop stopped from one of its own callbacks cannot be joined on its own
//!   thread. It is parked as retiring, and `start` joins it before spawning a
//!   replacement, so at most one loop runs callbacks at a time.
//! - Lock order is control, then worker, then retiring. Threads are never
//!   joined while the control or worker lock is held.

mod stats;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

pub use stats::SchedulerStats;

use self::stats::LoopStats;
use self::worker::LoopWorker;
use crate::callback::{CallbackId, CallbackKind, UpdateCallback};
use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::options::ScheduleOptions;
use crate::registry::Registry;

static SHARED_SCHEDULER: OnceLock<Arc<Scheduler>> = OnceLock::new();

/// State shared between the scheduler handle and its loop thread.
pub(crate) struct SchedulerShared {
    name: String,
    sync_registry: Mutex<Registry>,
    async_registry: Mutex<Registry>,
    report_interval_ms: AtomicU64,
    default_report_interval_ms: u64,
    stats: LoopStats,
}

impl SchedulerShared {
    fn new(config: &SchedulerConfig) -> Self {
        Self {
            name: config.thread_name.clone(),
            sync_registry: Mutex::new(Registry::new()),
            async_registry: Mutex::new(Registry::new()),
            report_interval_ms: AtomicU64::new(config.default_report_interval_ms),
            default_report_interval_ms: config.default_report_interval_ms,
            stats: LoopStats::default(),
        }
    }

    fn registry(&self, kind: CallbackKind) -> &Mutex<Registry> {
        match kind {
            CallbackKind::Sync => &self.sync_registry,
            CallbackKind::Async => &self.async_registry,
        }
    }

    fn report_interval_ms(&self) -> u64 {
        self.report_interval_ms.load(Ordering::Acquire)
    }

    fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms())
    }

    fn contains(&self, id: CallbackId) -> bool {
        self.sync_registry.lock().contains(id) || self.async_registry.lock().contains(id)
    }

    fn is_empty(&self) -> bool {
        self.sync_registry.lock().is_empty() && self.async_registry.lock().is_empty()
    }

    /// Set the report interval to the minimum over active subscriptions.
    fn recompute_interval(&self) -> u64 {
        let sync_min = self.sync_registry.lock().min_active_interval_ms();
        let async_min = self.async_registry.lock().min_active_interval_ms();

        let interval = sync_min
            .into_iter()
            .chain(async_min)
            .min()
            .unwrap_or(self.default_report_interval_ms);

        let previous = self.report_interval_ms.swap(interval, Ordering::AcqRel);
        if previous != interval {
            debug!(
                scheduler = %self.name,
                previous_ms = previous,
                interval_ms = interval,
                "Report interval changed"
            );
        }
        interval
    }
}

/// Cooperative update scheduler.
///
/// Use [`Scheduler::shared`] for the process-wide instance, or create a
/// dedicated scheduler to give a device its own loop thread.
pub struct Scheduler {
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
    /// Serialises registry mutation and interval recompute.
    control: Mutex<()>,
    worker: Mutex<Option<LoopWorker>>,
    /// Cancelled loops that were stopped from their own thread.
    retiring: Mutex<Vec<LoopWorker>>,
}

impl Scheduler {
    /// Create a dedicated scheduler.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(SchedulerShared::new(&config)),
            config,
            control: Mutex::new(()),
            worker: Mutex::new(None),
            retiring: Mutex::new(Vec::new()),
        }
    }

    /// The process-wide scheduler, created on first access.
    ///
    /// It is never torn down; its loop only runs while it has subscribers.
    pub fn shared() -> Arc<Scheduler> {
        SHARED_SCHEDULER
            .get_or_init(|| {
                debug!("Creating shared scheduler");
                Arc::new(Scheduler::default())
            })
            .clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register `callback` with `options`.
    ///
    /// Starts the loop when `auto_start` is set and it is not running.
    pub fn schedule(&self, callback: &UpdateCallback, options: ScheduleOptions) -> Result<()> {
        validate_options(&options)?;
        let id = callback.id();

        {
            let _control = self.control.lock();
            if self.shared.contains(id) {
                return Err(Error::AlreadyScheduled(id.to_string()));
            }
            self.shared
                .registry(callback.kind())
                .lock()
                .insert(callback.clone(), options)?;
            let interval = self.shared.recompute_interval();

            debug!(
                scheduler = %self.shared.name,
                callback = %id,
                options = %options,
                interval_ms = interval,
                "Callback scheduled"
            );
        }

        // Outside the control lock: starting may join a retiring loop whose
        // callbacks still call into the scheduler.
        if self.config.auto_start {
            self.launch(true)?;
        }
        Ok(())
    }

    /// Remove `callback`. Unknown callbacks are ignored.
    ///
    /// Stops the loop once both registries are empty.
    pub fn unschedule(&self, callback: &UpdateCallback) -> Result<()> {
        let id = callback.id();

        let idle_worker = {
            let _control = self.control.lock();
            if !self.shared.registry(callback.kind()).lock().remove(id) {
                return Ok(());
            }
            let interval = self.shared.recompute_interval();
            debug!(
                scheduler = %self.shared.name,
                callback = %id,
                interval_ms = interval,
                "Callback unscheduled"
            );

            if self.shared.is_empty() {
                info!(scheduler = %self.shared.name, "No subscriptions left, stopping loop");
                self.detach_worker(&mut self.worker.lock())
            } else {
                None
            }
        };

        if let Some(worker) = idle_worker {
            worker.join();
        }
        Ok(())
    }

    /// Skip `callback` without losing its position.
    pub fn suspend(&self, callback: &UpdateCallback) -> Result<()> {
        self.set_suspended(callback, true)
    }

    /// Resume a suspended `callback`.
    pub fn resume(&self, callback: &UpdateCallback) -> Result<()> {
        self.set_suspended(callback, false)
    }

    fn set_suspended(&self, callback: &UpdateCallback, suspended: bool) -> Result<()> {
        let id = callback.id();

        let _control = self.control.lock();
        self.shared
            .registry(callback.kind())
            .lock()
            .set_suspended(id, suspended)?;
        let interval = self.shared.recompute_interval();

        debug!(
            scheduler = %self.shared.name,
            callback = %id,
            suspended,
            interval_ms = interval,
            "Subscription state changed"
        );
        Ok(())
    }

    /// Replace the options of a scheduled `callback`.
    pub fn update_schedule(&self, callback: &UpdateCallback, options: ScheduleOptions) -> Result<()> {
        validate_options(&options)?;
        let id = callback.id();

        let _control = self.control.lock();
        self.shared
            .registry(callback.kind())
            .lock()
            .replace_options(id, options)?;
        let interval = self.shared.recompute_interval();

        debug!(
            scheduler = %self.shared.name,
            callback = %id,
            options = %options,
            interval_ms = interval,
            "Schedule updated"
        );
        Ok(())
    }

    /// Start the loop. Does nothing if it is already running.
    ///
    /// A loop that was stopped from its own callback and is still finishing
    /// its iteration is joined first, unless `start` is called from that loop.
    pub fn start(&self) -> Result<()> {
        self.launch(false)
    }

    /// Spawn the loop unless one is running. With `require_subscribers`, an
    /// empty scheduler is left idle.
    fn launch(&self, require_subscribers: bool) -> Result<()> {
        loop {
            let mut worker = self.worker.lock();

            let pending = self.take_foreign_retiring();
            if !pending.is_empty() {
                drop(worker);
                debug!(
                    scheduler = %self.shared.name,
                    count = pending.len(),
                    "Waiting for retiring loop before restart"
                );
                for retired in pending {
                    retired.join();
                }
                continue;
            }

            if let Some(existing) = worker.as_ref() {
                if !existing.is_finished() {
                    return Ok(());
                }
                if let Some(finished) = worker.take() {
                    finished.join();
                }
            }

            if require_subscribers && self.shared.is_empty() {
                return Ok(());
            }

            *worker = Some(LoopWorker::spawn(
                self.shared.clone(),
                &self.config.thread_name,
                self.config.fault_policy,
            )?);
            return Ok(());
        }
    }

    /// Stop the loop and wait for it to exit. Does nothing if not running.
    ///
    /// Called from a callback, the loop is cancelled without waiting and
    /// finishes its current iteration.
    pub fn stop(&self) {
        let worker = self.detach_worker(&mut self.worker.lock());
        if let Some(worker) = worker {
            worker.join();
        }
    }

    /// Take the worker out of `slot` and cancel it.
    ///
    /// Returns the worker when the caller must join it. A worker stopped from
    /// its own loop thread is parked in `retiring` instead.
    fn detach_worker(&self, slot: &mut Option<LoopWorker>) -> Option<LoopWorker> {
        let worker = slot.take()?;
        worker.cancel();

        if worker.is_loop_thread() {
            debug!(
                scheduler = %self.shared.name,
                "Scheduler loop stopped from its own callback, not joining"
            );
            self.retiring.lock().push(worker);
            return None;
        }
        Some(worker)
    }

    /// Retiring workers that the current thread can join.
    fn take_foreign_retiring(&self) -> Vec<LoopWorker> {
        let mut retiring = self.retiring.lock();
        let (own, foreign): (Vec<_>, Vec<_>) = std::mem::take(&mut *retiring)
            .into_iter()
            .partition(LoopWorker::is_loop_thread);
        *retiring = own;
        foreign
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Current shared sleep period.
    pub fn report_interval(&self) -> Duration {
        self.shared.report_interval()
    }

    pub fn is_scheduled(&self, callback: &UpdateCallback) -> bool {
        self.shared.contains(callback.id())
    }

    pub fn is_suspended(&self, callback: &UpdateCallback) -> Result<bool> {
        self.shared
            .registry(callback.kind())
            .lock()
            .is_suspended(callback.id())
    }

    /// Options currently stored for `callback`.
    pub fn options_of(&self, callback: &UpdateCallback) -> Result<ScheduleOptions> {
        self.shared
            .registry(callback.kind())
            .lock()
            .options(callback.id())
    }

    /// Number of registered callbacks, suspended ones included.
    pub fn subscription_count(&self) -> usize {
        self.shared.sync_registry.lock().len() + self.shared.async_registry.lock().len()
    }

    /// Number of registered callbacks that are not suspended.
    pub fn active_count(&self) -> usize {
        self.shared.sync_registry.lock().active_count()
            + self.shared.async_registry.lock().active_count()
    }

    pub fn stats(&self) -> SchedulerStats {
        let (sync_subscriptions, sync_active) = {
            let registry = self.shared.sync_registry.lock();
            (registry.len(), registry.active_count())
        };
        let (async_subscriptions, async_active) = {
            let registry = self.shared.async_registry.lock();
            (registry.len(), registry.active_count())
        };

        self.shared.stats.snapshot(
            sync_subscriptions,
            async_subscriptions,
            sync_active + async_active,
            self.report_interval(),
            self.is_running(),
        )
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::from_valid_config(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
        for retired in self.take_foreign_retiring() {
            retired.join();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.name)
            .field("report_interval_ms", &self.shared.report_interval_ms())
            .field("is_running", &self.is_running())
            .finish()
    }
}

fn validate_options(options: &ScheduleOptions) -> Result<()> {
    if options.uses_default_interval() {
        return Err(Error::invalid_argument(
            "update interval must be greater than zero when scheduling",
        ));
    }
    Ok(())
}
