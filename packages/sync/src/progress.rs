//! Progress reporting for batch transfers.
//!
//! Decouples progress reporting from any rendering backend. The CLI plugs
//! in `indicatif` bars; library callers and tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a running batch.
///
/// Implementations must be `Send + Sync`: every worker task holds a clone of
/// the same `Arc`.
pub trait ProgressCallback: Send + Sync {
    /// Set the number of files in the batch.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` completed files.
    fn inc(&self, delta: u64);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
