//! Progress-callback trait for rendering events.
//!
//! Inject an [`Arc<dyn RenderProgressCallback>`] via
//! [`crate::config::ExportConfigBuilder::progress_callback`] to hear about
//! each journal as the assembler and renderer work through the selection.
//!
//! # Example
//!
//! ```rust
//! use journal2pdf::{ExportConfig, RenderProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     journals: AtomicUsize,
//! }
//!
//! impl RenderProgressCallback for CountingCallback {
//!     fn on_journal_complete(&self, index: usize, total: usize, _title: &str) {
//!         self.journals.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Journal {}/{} laid out", index + 1, total);
//!     }
//! }
//!
//! let config = ExportConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { journals: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the renderer as it works through a document.
///
/// Rendering is synchronous, so every method runs on the caller's thread.
/// All methods default to no-ops.
pub trait RenderProgressCallback: Send + Sync {
    /// Called once before layout starts.
    ///
    /// # Arguments
    /// * `journals`: number of journals contributing content
    /// * `blocks`: number of assembled blocks
    fn on_render_start(&self, journals: usize, blocks: usize) {
        let _ = (journals, blocks);
    }

    /// Called when layout reaches the first block of a journal (0-indexed).
    fn on_journal_start(&self, index: usize, total: usize, title: &str) {
        let _ = (index, total, title);
    }

    /// Called when the last block of a journal has been placed.
    fn on_journal_complete(&self, index: usize, total: usize, title: &str) {
        let _ = (index, total, title);
    }

    /// Called after pass 1 with the final page count.
    fn on_layout_complete(&self, pages: usize) {
        let _ = pages;
    }

    /// Called for every non-fatal problem as it is found.
    fn on_warning(&self, message: &str) {
        let _ = message;
    }

    /// Called once the PDF bytes are ready.
    ///
    /// # Arguments
    /// * `pages`: pages in the finished document
    /// * `bytes`: size of the serialised PDF
    fn on_render_complete(&self, pages: usize, bytes: usize) {
        let _ = (pages, bytes);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl RenderProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExportConfig`].
pub type ProgressCallback = Arc<dyn RenderProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        pages: AtomicUsize,
        warnings: Mutex<Vec<String>>,
    }

    impl RenderProgressCallback for TrackingCallback {
        fn on_journal_start(&self, _index: usize, _total: usize, _title: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_journal_complete(&self, _index: usize, _total: usize, _title: &str) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_layout_complete(&self, pages: usize) {
            self.pages.store(pages, Ordering::SeqCst);
        }

        fn on_warning(&self, message: &str) {
            self.warnings.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_render_start(2, 40);
        cb.on_journal_start(0, 2, "Lore");
        cb.on_journal_complete(0, 2, "Lore");
        cb.on_layout_complete(7);
        cb.on_warning("missing image");
        cb.on_render_complete(7, 1024);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_journal_start(0, 2, "A");
        tracker.on_journal_complete(0, 2, "A");
        tracker.on_journal_start(1, 2, "B");
        tracker.on_warning("Page 'X': missing image 'y.png'");
        tracker.on_layout_complete(5);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 5);
        assert_eq!(tracker.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_render_start(1, 1);
        cb.on_render_complete(3, 2048);
    }
}
