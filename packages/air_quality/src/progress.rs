//! Progress reporting for long-running fetch runs.
//!
//! The scheduler reports one unit per settled tile; the binary decides how
//! to render it.

use std::sync::Arc;

/// Receives progress updates from the ingestion pipeline.
///
/// Implementations must be `Send + Sync` so a single reporter can be shared
/// by all concurrent fetches of a window.
pub trait ProgressCallback: Send + Sync {
    /// Set the total number of tiles expected.
    fn set_total(&self, total: u64);

    /// Advance progress by `delta` tiles.
    fn inc(&self, delta: u64);

    /// Update the message displayed alongside the progress indicator.
    fn set_message(&self, msg: String);

    /// Mark progress as complete with a final message.
    fn finish(&self, msg: String);
}

/// A [`ProgressCallback`] that ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
