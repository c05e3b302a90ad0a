use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::UpdateCallback;

/// Initialize tracing for tests with appropriate settings
#[inline]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer() // Write to test output
        .try_init();
}

/// Create a synchronous callback that counts its invocations
pub fn counting_callback() -> (UpdateCallback, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let callback = UpdateCallback::from_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (callback, count)
}
