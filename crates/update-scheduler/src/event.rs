//! Observable events.
//!
//! An [`ObservableEvent`] is a multi-subscriber event that tells an
//! [`EventObserver`] when it gains its first handler and when it loses its
//! last one. Devices build their public events on it and share one
//! [`ScheduledUpdater`](crate::ScheduledUpdater) as the observer of all of
//! them, so polling runs only while somebody listens.
//!
//! Notifications for one event are serialised by a reentrant lock: two
//! threads cannot deliver `first_added` and `last_removed` out of order, yet a
//! handler or observer may still add or remove handlers of the same event
//! from the notifying thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::trace;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handler invoked with the sender and the event arguments.
pub type EventHandler<S, A> = Arc<dyn Fn(&S, &A) + Send + Sync>;

/// Registration token returned by [`ObservableEvent::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventToken(u64);

impl EventToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EventToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

/// Receives handler-count notifications from observable events.
///
/// Only the edge hooks are required; `added` and `removed` fire on every
/// change and default to no-ops.
pub trait EventObserver: Send + Sync {
    /// The event went from zero handlers to one.
    fn first_added(&self, event: &str);

    fn added(&self, _event: &str) {}

    fn removed(&self, _event: &str) {}

    /// The event went from one handler to zero.
    fn last_removed(&self, event: &str);
}

type FirstAddedFn = Box<dyn Fn() + Send + Sync>;

/// Multi-subscriber event with edge notifications.
pub struct ObservableEvent<S: ?Sized, A> {
    name: String,
    handlers: Mutex<Vec<(EventToken, EventHandler<S, A>)>>,
    observer: Option<Arc<dyn EventObserver>>,
    on_first_added: Option<FirstAddedFn>,
    notify: ReentrantMutex<()>,
}

impl<S: ?Sized, A> ObservableEvent<S, A> {
    pub fn new() -> Self {
        Self {
            name: String::from("event"),
            handlers: Mutex::new(Vec::new()),
            observer: None,
            on_first_added: None,
            notify: ReentrantMutex::new(()),
        }
    }

    /// Name passed to the observer and used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Side effect run on the 0 -> 1 transition, before the observer hears of it.
    pub fn on_first_added<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_first_added = Some(Box::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.lock().is_empty()
    }

    /// Register a handler.
    pub fn add(&self, handler: EventHandler<S, A>) -> EventToken {
        let _notify = self.notify.lock();
        let token = EventToken::next();

        let was_empty = {
            let mut handlers = self.handlers.lock();
            let was_empty = handlers.is_empty();
            handlers.push((token, handler));
            was_empty
        };
        trace!(event = %self.name, token = %token, first = was_empty, "Handler added");

        if was_empty {
            if let Some(f) = &self.on_first_added {
                f();
            }
            if let Some(observer) = &self.observer {
                observer.first_added(&self.name);
            }
        }
        if let Some(observer) = &self.observer {
            observer.added(&self.name);
        }

        token
    }

    /// Register a closure as handler.
    pub fn subscribe<F>(&self, f: F) -> EventToken
    where
        F: Fn(&S, &A) + Send + Sync + 'static,
    {
        self.add(Arc::new(f))
    }

    /// Remove the most recent registration of `handler`.
    pub fn remove(&self, handler: &EventHandler<S, A>) -> bool {
        let target = Arc::as_ptr(handler) as *const ();
        self.remove_where(|(_, h)| Arc::as_ptr(h) as *const () == target)
    }

    /// Remove the registration identified by `token`.
    pub fn remove_token(&self, token: EventToken) -> bool {
        self.remove_where(|(t, _)| *t == token)
    }

    fn remove_where<P>(&self, predicate: P) -> bool
    where
        P: Fn(&(EventToken, EventHandler<S, A>)) -> bool,
    {
        let _notify = self.notify.lock();

        let now_empty = {
            let mut handlers = self.handlers.lock();
            match handlers.iter().rposition(predicate) {
                Some(idx) => {
                    handlers.remove(idx);
                    handlers.is_empty()
                }
                None => return false,
            }
        };
        trace!(event = %self.name, last = now_empty, "Handler removed");

        if let Some(observer) = &self.observer {
            observer.removed(&self.name);
            if now_empty {
                observer.last_removed(&self.name);
            }
        }
        true
    }

    /// Invoke every handler registered at the time of the call.
    pub fn raise(&self, sender: &S, args: &A) {
        let handlers: Vec<EventHandler<S, A>> = {
            let handlers = self.handlers.lock();
            if handlers.is_empty() {
                return;
            }
            handlers.iter().map(|(_, h)| h.clone()).collect()
        };

        for handler in handlers {
            handler(sender, args);
        }
    }
}

impl<S: ?Sized, A> Default for ObservableEvent<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ?Sized, A> fmt::Debug for ObservableEvent<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableEvent")
            .field("name", &self.name)
            .field("handlers", &self.handler_count())
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}
