//! # Update Scheduler
//!
//! A cooperative scheduler that multiplexes periodic device updates (sensor
//! polling, display refresh, software PWM) onto background loops.
//!
//! ## Features
//!
//! - `Scheduler`: one loop per instance, running at the shortest interval any
//!   active subscriber asks for, invoking callbacks in registration order
//! - `ScheduledUpdater`: per-device start/stop façade that polls only while
//!   one of the device's events has listeners
//! - `ObservableEvent`: multi-subscriber event with first-added and
//!   last-removed notifications
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use update_scheduler::{ObservableEvent, ScheduleOptions, ScheduledUpdater};
//!
//! # fn main() -> update_scheduler::Result<()> {
//! let updater = Arc::new(ScheduledUpdater::with_shared_scheduler(ScheduleOptions::new(100))?);
//! let reading: ObservableEvent<(), f32> = ObservableEvent::new()
//!     .with_name("reading")
//!     .with_observer(updater.clone());
//!
//! updater.set_update_action(|| {
//!     // read the sensor and raise `reading`
//! })?;
//!
//! // Polling starts with the first handler and stops after the last.
//! let token = reading.subscribe(|_, value| println!("{value}"));
//! reading.remove_token(token);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod error;
pub mod event;
pub mod fault;
pub mod options;
mod registry;
pub mod scheduler;
pub mod updater;

#[cfg(test)]
mod test_utils;

pub use callback::{CallbackId, CallbackKind, UpdateCallback};
pub use config::{FaultPolicy, SchedulerConfig};
pub use error::{Error, ErrorKind, Result};
pub use event::{EventHandler, EventObserver, EventToken, ObservableEvent};
pub use options::{ScheduleOptions, SchedulePriority};
pub use scheduler::{Scheduler, SchedulerStats};
pub use updater::{LifecycleEvent, ScheduledUpdater};
