//! Ordered subscription registry.
//!
//! One registry holds the callbacks of one kind. Entries keep insertion order;
//! suspension toggles a flag in place so a resumed callback keeps its slot.
//! The loop never iterates the registry while holding its lock: it takes a
//! [`snapshot`](Registry::snapshot) and checks each entry's flags as it goes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::callback::{CallbackId, UpdateCallback};
use crate::error::{Error, Result};
use crate::options::ScheduleOptions;

/// Flags shared between the registry and in-flight iterations.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionFlags {
    suspended: AtomicBool,
    retired: AtomicBool,
}

impl SubscriptionFlags {
    /// Whether the loop should invoke this entry.
    pub(crate) fn is_runnable(&self) -> bool {
        !self.suspended.load(Ordering::Acquire) && !self.retired.load(Ordering::Acquire)
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Subscription {
    callback: UpdateCallback,
    options: ScheduleOptions,
    flags: Arc<SubscriptionFlags>,
}

/// A registered callback as seen by one loop iteration.
pub(crate) struct SnapshotEntry {
    pub(crate) callback: UpdateCallback,
    pub(crate) flags: Arc<SubscriptionFlags>,
}

/// Insertion-ordered mapping from callback identity to subscription.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Vec<Subscription>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: CallbackId) -> Option<usize> {
        self.entries.iter().position(|s| s.callback.id() == id)
    }

    fn get(&self, id: CallbackId) -> Result<&Subscription> {
        self.position(id)
            .map(|idx| &self.entries[idx])
            .ok_or_else(|| Error::SubscriptionNotFound(id.to_string()))
    }

    pub(crate) fn contains(&self, id: CallbackId) -> bool {
        self.position(id).is_some()
    }

    /// Append a new subscription. Fails if the identity is already present.
    pub(crate) fn insert(&mut self, callback: UpdateCallback, options: ScheduleOptions) -> Result<()> {
        let id = callback.id();
        if self.contains(id) {
            return Err(Error::AlreadyScheduled(id.to_string()));
        }
        self.entries.push(Subscription {
            callback,
            options,
            flags: Arc::new(SubscriptionFlags::default()),
        });
        Ok(())
    }

    /// Remove a subscription, returning whether it was present.
    pub(crate) fn remove(&mut self, id: CallbackId) -> bool {
        match self.position(id) {
            Some(idx) => {
                let removed = self.entries.remove(idx);
                removed.flags.retired.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_suspended(&self, id: CallbackId, suspended: bool) -> Result<()> {
        self.get(id)?
            .flags
            .suspended
            .store(suspended, Ordering::Release);
        Ok(())
    }

    pub(crate) fn is_suspended(&self, id: CallbackId) -> Result<bool> {
        Ok(self.get(id)?.flags.is_suspended())
    }

    pub(crate) fn options(&self, id: CallbackId) -> Result<ScheduleOptions> {
        Ok(self.get(id)?.options)
    }

    pub(crate) fn replace_options(&mut self, id: CallbackId, options: ScheduleOptions) -> Result<()> {
        let idx = self
            .position(id)
            .ok_or_else(|| Error::SubscriptionNotFound(id.to_string()))?;
        self.entries[idx].options = options;
        Ok(())
    }

    /// Number of subscriptions that are not suspended.
    pub(crate) fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|s| !s.flags.is_suspended())
            .count()
    }

    /// Smallest interval among active subscriptions.
    pub(crate) fn min_active_interval_ms(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter(|s| !s.flags.is_suspended())
            .map(|s| s.options.update_interval_ms())
            .min()
    }

    pub(crate) fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.entries
            .iter()
            .map(|s| SnapshotEntry {
                callback: s.callback.clone(),
                flags: s.flags.clone(),
            })
            .collect()
    }
}
