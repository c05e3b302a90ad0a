//! Updater façade.
//!
//! A `ScheduledUpdater` wraps one scheduler subscription for a device driver.
//! It turns "somebody listens to my events" into "I am polling hardware":
//! every [`ObservableEvent`] of the device uses the updater as its observer,
//! the updater keeps one aggregate count of events with listeners, starts on
//! the first and stops after the last.
//!
//! Stopping suspends the subscription instead of removing it, so the device
//! keeps its place in the scheduler's invocation order. Only
//! [`dispose`](ScheduledUpdater::dispose) removes it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::callback::UpdateCallback;
use crate::error::{Error, Result};
use crate::event::{EventObserver, ObservableEvent};
use crate::options::ScheduleOptions;
use crate::scheduler::Scheduler;

/// Lifecycle notification raised by a [`ScheduledUpdater`].
///
/// Handlers run on the thread that starts or stops the updater, with its
/// lifecycle lock held. They may add or remove handlers of events the updater
/// observes on that same thread, but must not wait for another thread that
/// does so: the event's notification lock would then be taken in the opposite
/// order and both threads would block.
pub type LifecycleEvent = ObservableEvent<ScheduledUpdater, ()>;

struct UpdaterState {
    /// `None` once disposed.
    scheduler: Option<Arc<Scheduler>>,
    action: Option<UpdateCallback>,
    options: ScheduleOptions,
    scheduled: bool,
    started: bool,
}

/// Start/stop wrapper around one scheduler subscription.
pub struct ScheduledUpdater {
    default_options: ScheduleOptions,
    state: Mutex<UpdaterState>,
    /// Serialises start, stop, interval changes and observer edges.
    lifecycle: ReentrantMutex<()>,
    events_subscribed: AtomicUsize,
    start_with_events: AtomicBool,
    stop_with_events: AtomicBool,
    starting: LifecycleEvent,
    started: LifecycleEvent,
    stopping: LifecycleEvent,
    stopped: LifecycleEvent,
}

impl ScheduledUpdater {
    /// Create an updater bound to `scheduler`.
    ///
    /// `default_options` must carry a nonzero interval; it is what an update
    /// interval of `0` restores.
    pub fn new(scheduler: Arc<Scheduler>, default_options: ScheduleOptions) -> Result<Self> {
        if default_options.uses_default_interval() {
            return Err(Error::invalid_argument(
                "default update interval must be greater than zero",
            ));
        }

        Ok(Self {
            default_options,
            state: Mutex::new(UpdaterState {
                scheduler: Some(scheduler),
                action: None,
                options: default_options,
                scheduled: false,
                started: false,
            }),
            lifecycle: ReentrantMutex::new(()),
            events_subscribed: AtomicUsize::new(0),
            start_with_events: AtomicBool::new(true),
            stop_with_events: AtomicBool::new(true),
            starting: LifecycleEvent::new().with_name("starting"),
            started: LifecycleEvent::new().with_name("started"),
            stopping: LifecycleEvent::new().with_name("stopping"),
            stopped: LifecycleEvent::new().with_name("stopped"),
        })
    }

    /// Create an updater bound to the process-wide scheduler.
    pub fn with_shared_scheduler(default_options: ScheduleOptions) -> Result<Self> {
        Self::new(Scheduler::shared(), default_options)
    }

    /// Set a synchronous update action.
    ///
    /// Replaces any action set earlier. Fails once scheduling has begun.
    pub fn set_update_action<F>(&self, f: F) -> Result<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.set_action(UpdateCallback::from_fn(f))
    }

    /// Set an asynchronous update action.
    ///
    /// Replaces any action set earlier. Fails once scheduling has begun.
    pub fn set_async_update_action<F, Fut>(&self, f: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.set_action(UpdateCallback::from_async(f))
    }

    fn set_action(&self, action: UpdateCallback) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let mut state = self.state.lock();
        if state.scheduler.is_none() {
            return Err(Error::Disposed);
        }
        if state.scheduled {
            return Err(Error::ExistingUpdateAction);
        }
        state.action = Some(action);
        Ok(())
    }

    /// Begin polling. Does nothing if already started.
    pub fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let (scheduler, action, options, scheduled) = {
            let state = self.state.lock();
            let scheduler = state.scheduler.clone().ok_or(Error::Disposed)?;
            let action = state.action.clone().ok_or(Error::NoUpdateAction)?;
            if state.started {
                return Ok(());
            }
            (scheduler, action, state.options, state.scheduled)
        };

        self.starting.raise(self, &());
        // A handler may have subscribed to an observed event, which starts
        // the updater re-entrantly.
        if self.state.lock().started {
            return Ok(());
        }

        if scheduled {
            scheduler.resume(&action)?;
        } else {
            scheduler.schedule(&action, options)?;
        }

        {
            let mut state = self.state.lock();
            state.scheduled = true;
            state.started = true;
        }
        debug!(callback = %action.id(), options = %options, "Updater started");

        self.started.raise(self, &());
        Ok(())
    }

    /// Pause polling. Does nothing if not started.
    pub fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let (scheduler, action) = {
            let state = self.state.lock();
            let scheduler = state.scheduler.clone().ok_or(Error::Disposed)?;
            if !state.started {
                return Ok(());
            }
            let action = state.action.clone().ok_or(Error::NoUpdateAction)?;
            (scheduler, action)
        };

        self.stopping.raise(self, &());
        if !self.state.lock().started {
            return Ok(());
        }

        scheduler.suspend(&action)?;
        self.state.lock().started = false;
        debug!(callback = %action.id(), "Updater stopped");

        self.stopped.raise(self, &());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Whether the action has been registered with the scheduler.
    pub fn is_scheduled(&self) -> bool {
        self.state.lock().scheduled
    }

    pub fn is_disposed(&self) -> bool {
        self.state.lock().scheduler.is_none()
    }

    /// Current update interval in milliseconds.
    pub fn update_interval(&self) -> u64 {
        self.state.lock().options.update_interval_ms()
    }

    /// Change the update interval. `0` restores the default interval.
    pub fn set_update_interval(&self, interval_ms: u64) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let (scheduler, action, options) = {
            let state = self.state.lock();
            let scheduler = state.scheduler.clone().ok_or(Error::Disposed)?;
            let interval_ms = if interval_ms == 0 {
                self.default_options.update_interval_ms()
            } else {
                interval_ms
            };
            let options = state.options.with_new_update_interval(interval_ms);
            let action = state.action.clone().filter(|_| state.scheduled);
            (scheduler, action, options)
        };

        if let Some(action) = action {
            scheduler.update_schedule(&action, options)?;
        }
        self.state.lock().options = options;
        Ok(())
    }

    /// Current options, as last handed to the scheduler.
    pub fn options(&self) -> ScheduleOptions {
        self.state.lock().options
    }

    /// Options captured at construction.
    pub fn default_options(&self) -> ScheduleOptions {
        self.default_options
    }

    /// The scheduler this updater is bound to.
    pub fn scheduler(&self) -> Result<Arc<Scheduler>> {
        self.state.lock().scheduler.clone().ok_or(Error::Disposed)
    }

    pub fn start_with_events(&self) -> bool {
        self.start_with_events.load(Ordering::Acquire)
    }

    /// Start when the first observed event gains a handler.
    pub fn set_start_with_events(&self, enabled: bool) {
        self.start_with_events.store(enabled, Ordering::Release);
    }

    pub fn stop_with_events(&self) -> bool {
        self.stop_with_events.load(Ordering::Acquire)
    }

    /// Stop when the last observed event loses its last handler.
    pub fn set_stop_with_events(&self, enabled: bool) {
        self.stop_with_events.store(enabled, Ordering::Release);
    }

    /// Number of observed events that currently have handlers.
    pub fn events_subscribed(&self) -> usize {
        self.events_subscribed.load(Ordering::Acquire)
    }

    pub fn starting(&self) -> &LifecycleEvent {
        &self.starting
    }

    pub fn started(&self) -> &LifecycleEvent {
        &self.started
    }

    pub fn stopping(&self) -> &LifecycleEvent {
        &self.stopping
    }

    pub fn stopped(&self) -> &LifecycleEvent {
        &self.stopped
    }

    /// Remove the subscription and release the scheduler.
    ///
    /// Every later operation fails with [`Error::Disposed`]. Calling it again
    /// does nothing.
    pub fn dispose(&self) {
        // Unscheduling may join the loop thread, so no lock is held across it.
        let (scheduler, action) = {
            let _lifecycle = self.lifecycle.lock();
            let mut state = self.state.lock();
            let Some(scheduler) = state.scheduler.take() else {
                return;
            };
            state.started = false;
            let scheduled = std::mem::take(&mut state.scheduled);
            (scheduler, state.action.clone().filter(|_| scheduled))
        };

        if let Some(action) = action {
            if let Err(e) = scheduler.unschedule(&action) {
                warn!(callback = %action.id(), error = %e, "Failed to unschedule disposed updater");
            }
        }
        debug!("Updater disposed");
    }
}

impl EventObserver for ScheduledUpdater {
    fn first_added(&self, event: &str) {
        let _lifecycle = self.lifecycle.lock();
        let previous = self.events_subscribed.fetch_add(1, Ordering::AcqRel);

        if previous == 0 && self.start_with_events() {
            if let Err(e) = self.start() {
                warn!(event, error = %e, "Failed to start updater for first subscriber");
            }
        }
    }

    fn last_removed(&self, event: &str) {
        let _lifecycle = self.lifecycle.lock();
        let previous = self
            .events_subscribed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);

        if previous == 1 && self.stop_with_events() {
            if let Err(e) = self.stop() {
                warn!(event, error = %e, "Failed to stop updater after last subscriber");
            }
        }
    }
}

impl Drop for ScheduledUpdater {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for ScheduledUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScheduledUpdater")
            .field("options", &state.options)
            .field("scheduled", &state.scheduled)
            .field("started", &state.started)
            .field("disposed", &state.scheduler.is_none())
            .field("events_subscribed", &self.events_subscribed())
            .finish()
    }
}
