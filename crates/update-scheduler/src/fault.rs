//! Loop fault handling.
//!
//! Callbacks are not isolated from each other: a panic unwinds out of the
//! iteration that ran it. The loop body runs under [`run_guarded`], which
//! applies the scheduler's [`FaultPolicy`] so a dead loop is never silent.

use std::any::Any;
use std::panic::{AssertUnwindSafe, PanicHookInfo, catch_unwind, take_hook};
use std::thread;

use tracing::error;

use crate::config::FaultPolicy;

/// How the guarded loop body ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopExit {
    Completed,
    Faulted(String),
}

/// Run `body`, applying `policy` if it panics.
///
/// With [`FaultPolicy::Abort`] this does not return on a panic.
pub(crate) fn run_guarded<F>(scheduler: &str, policy: FaultPolicy, body: F) -> LoopExit
where
    F: FnOnce(),
{
    let payload = match catch_unwind(AssertUnwindSafe(body)) {
        Ok(()) => return LoopExit::Completed,
        Err(payload) => payload,
    };

    let fault = payload_to_string(payload.as_ref());
    match policy {
        FaultPolicy::Abort => {
            error!(
                scheduler = %scheduler,
                fault = %fault,
                "Update callback panicked, aborting process"
            );
            std::process::abort();
        }
        FaultPolicy::StopLoop => {
            error!(
                scheduler = %scheduler,
                fault = %fault,
                "Update callback panicked, scheduler loop stopped"
            );
            LoopExit::Faulted(fault)
        }
    }
}

/// Installs a panic hook that also reports panics through `tracing`.
///
/// The previously installed hook still runs afterwards.
pub fn install_panic_hook() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let record = format_panic_record(panic_info);
            error!(target: "update_scheduler::panic", "{record}");
        }));

        previous_hook(panic_info);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = payload_to_string(panic_info.payload());
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    format!("PANIC thread={thread_name} location={location} payload={payload}")
}

fn payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "<non-string panic payload>".to_string()
}
