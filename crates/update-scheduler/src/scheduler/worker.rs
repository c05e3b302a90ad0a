//! The background loop.
//!
//! Each running scheduler owns one worker: a dedicated OS thread that invokes
//! the subscribed callbacks once per report interval. Synchronous callbacks
//! run directly on the thread. Asynchronous callbacks are driven by a
//! current-thread tokio runtime owned by the worker, with timers and I/O
//! enabled. They are all started together and awaited before the sleep
//! phase. The sleep itself is raced against the cancellation token, so `stop`
//! never waits for a full idle period.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::SchedulerShared;
use crate::callback::UpdateCallback;
use crate::config::FaultPolicy;
use crate::error::Result;
use crate::fault::{LoopExit, run_guarded};

/// Handle to a running loop thread.
pub(crate) struct LoopWorker {
    token: CancellationToken,
    handle: JoinHandle<LoopExit>,
    thread_id: ThreadId,
}

impl LoopWorker {
    /// Spawn the loop thread.
    pub(crate) fn spawn(
        shared: Arc<SchedulerShared>,
        thread_name: &str,
        policy: FaultPolicy,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let name = thread_name.to_string();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                run_guarded(&name, policy, || {
                    run_loop(&shared, &runtime, &loop_token);
                })
            })?;
        let thread_id = handle.thread().id();

        Ok(Self {
            token,
            handle,
            thread_id,
        })
    }

    /// The loop thread has exited, either after cancellation or a fault.
    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Whether the caller is running on this worker's loop thread.
    pub(crate) fn is_loop_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Ask the loop to exit at its next iteration boundary.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the loop and wait for its thread to exit.
    ///
    /// Must not be called from the loop thread itself.
    pub(crate) fn join(self) {
        self.token.cancel();

        match self.handle.join() {
            Ok(LoopExit::Completed) => {}
            Ok(LoopExit::Faulted(fault)) => {
                debug!(fault = %fault, "Reaped faulted scheduler loop");
            }
            Err(_) => {
                error!("Scheduler loop thread panicked outside the fault guard");
            }
        }
    }
}

fn run_loop(shared: &SchedulerShared, runtime: &Runtime, token: &CancellationToken) {
    info!(
        scheduler = %shared.name,
        interval_ms = shared.report_interval_ms(),
        "Scheduler loop started"
    );

    while !token.is_cancelled() {
        let started = Instant::now();

        run_sync_phase(shared);
        run_async_phase(shared, runtime);

        let period = shared.report_interval();
        let elapsed = started.elapsed();
        let overrun = elapsed >= period;
        shared.stats.record_iteration(overrun);

        if overrun {
            trace!(
                scheduler = %shared.name,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = period.as_millis() as u64,
                "Iteration exceeded report interval"
            );
            continue;
        }

        if sleep_or_cancel(runtime, token, period - elapsed) {
            break;
        }
    }

    info!(scheduler = %shared.name, "Scheduler loop stopped");
}

fn run_sync_phase(shared: &SchedulerShared) {
    let entries = shared.sync_registry.lock().snapshot();

    for entry in &entries {
        // Flags are read per entry: a suspend issued by an earlier callback
        // in this same pass already applies.
        if !entry.flags.is_runnable() {
            continue;
        }
        if let UpdateCallback::Sync(callback) = &entry.callback {
            callback();
            shared.stats.record_sync_invocation();
        }
    }
}

fn run_async_phase(shared: &SchedulerShared, runtime: &Runtime) {
    let entries = shared.async_registry.lock().snapshot();
    if entries.is_empty() {
        return;
    }

    // Futures are created inside the runtime: a callback may build timers or
    // sockets before its future is first polled.
    let count = runtime.block_on(async {
        let pending: Vec<_> = entries
            .iter()
            .filter(|entry| entry.flags.is_runnable())
            .filter_map(|entry| match &entry.callback {
                UpdateCallback::Async(callback) => Some(callback()),
                UpdateCallback::Sync(_) => None,
            })
            .collect();

        let count = pending.len();
        join_all(pending).await;
        count
    });

    if count > 0 {
        shared.stats.record_async_invocations(count);
    }
}

/// Sleep for `duration` unless cancelled first. Returns true on cancellation.
fn sleep_or_cancel(runtime: &Runtime, token: &CancellationToken, duration: Duration) -> bool {
    runtime.block_on(async {
        tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    })
}
