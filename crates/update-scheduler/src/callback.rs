//! Update callbacks and their identity.
//!
//! A callback is either synchronous or asynchronous. The kind is decided once,
//! when the `UpdateCallback` is built, and the scheduler dispatches on the tag
//! instead of inspecting the closure again on every call.
//!
//! Identity is the address of the shared allocation. Two clones of the same
//! `UpdateCallback` are the same subscriber; two callbacks built from
//! identical closures are not.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

type SyncFn = dyn Fn() + Send + Sync;
type AsyncFn = dyn Fn() -> BoxFuture<'static, ()> + Send + Sync;

/// Which registry a callback belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Sync,
    Async,
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackKind::Sync => write!(f, "sync"),
            CallbackKind::Async => write!(f, "async"),
        }
    }
}

/// Identity of a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId {
    kind: CallbackKind,
    addr: usize,
}

impl CallbackId {
    pub fn kind(&self) -> CallbackKind {
        self.kind
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:#x}", self.kind, self.addr)
    }
}

/// A unit of work run once per scheduler iteration.
#[derive(Clone)]
pub enum UpdateCallback {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

impl UpdateCallback {
    /// Wrap a synchronous closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wrap a closure returning a future. Each invocation creates a new future.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::Async(Arc::new(move || f().boxed()))
    }

    pub fn kind(&self) -> CallbackKind {
        match self {
            UpdateCallback::Sync(_) => CallbackKind::Sync,
            UpdateCallback::Async(_) => CallbackKind::Async,
        }
    }

    pub fn id(&self) -> CallbackId {
        let addr = match self {
            UpdateCallback::Sync(f) => Arc::as_ptr(f) as *const () as usize,
            UpdateCallback::Async(f) => Arc::as_ptr(f) as *const () as usize,
        };
        CallbackId {
            kind: self.kind(),
            addr,
        }
    }

    /// Identity comparison.
    pub fn same_as(&self, other: &UpdateCallback) -> bool {
        self.id() == other.id()
    }
}

impl fmt::Debug for UpdateCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpdateCallback").field(&self.id()).finish()
    }
}
