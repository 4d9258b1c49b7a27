//! Progress-callback trait for batch stages.
//!
//! Inject an `Arc<dyn BatchProgress>` via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive real-time
//! events as the enricher works through pages or the retrieval engine works
//! through queries.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers
//! can forward events to a terminal progress bar, a log file, or a metrics
//! sink without the library knowing anything about how the host application
//! communicates. The trait is `Send + Sync` because items complete
//! concurrently and out of order.

use std::sync::Arc;

/// Called by batch stages as they process work items.
///
/// `key` identifies the item within its batch: `"doc=7 page=3"` for
/// enrichment, `"qid=12"` for retrieval. All methods have default no-op
/// implementations so callers only override what they care about.
///
/// # Thread safety
///
/// `on_item_done` and `on_item_error` may be called concurrently from
/// different workers. Implementations must protect shared mutable state
/// with appropriate synchronisation (`Mutex`, atomics).
pub trait BatchProgress: Send + Sync {
    /// Called once before any item is dispatched.
    fn on_batch_start(&self, stage: &str, total_items: usize) {
        let _ = (stage, total_items);
    }

    /// Called when one item completes successfully.
    fn on_item_done(&self, key: &str) {
        let _ = key;
    }

    /// Called when one item fails (after its retries are exhausted).
    fn on_item_error(&self, key: &str, error: &str) {
        let _ = (key, error);
    }

    /// Called once after every item has been attempted.
    fn on_batch_complete(&self, stage: &str, succeeded: usize, failed: usize) {
        let _ = (stage, succeeded, failed);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl BatchProgress for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type Progress = Arc<dyn BatchProgress>;
