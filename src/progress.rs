//! Progress-callback trait for export events.
//!
//! Inject an [`Arc<dyn ExportProgressCallback>`] via
//! [`crate::config::ExportConfigBuilder::progress_callback`] to receive events
//! as the exporter prepares images and captures pages. Callers can forward
//! them to a progress bar, a channel or a log without the library knowing how
//! the host application reports progress.
//!
//! # Example
//!
//! ```rust
//! use cv_export::{ExportConfig, ExportProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct PageCounter(AtomicUsize);
//!
//! impl ExportProgressCallback for PageCounter {
//!     fn on_page_complete(&self, page_num: usize, total_pages: usize, raster_bytes: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num}/{total_pages} ({raster_bytes} bytes)");
//!     }
//! }
//!
//! let config = ExportConfig::builder()
//!     .progress_callback(Arc::new(PageCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the exporter as it works through one export.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive in order from a single task.
pub trait ExportProgressCallback: Send + Sync {
    /// Called once the isolated copy exists and its images are known.
    fn on_export_start(&self, image_count: usize) {
        let _ = image_count;
    }

    /// Called after each image has been prepared (inlined or skipped).
    ///
    /// # Arguments
    /// * `index`: 1-indexed position in document order
    /// * `total`: number of images in the document
    /// * `inlined`: `false` when the image kept its original source
    fn on_image_prepared(&self, index: usize, total: usize, inlined: bool) {
        let _ = (index, total, inlined);
    }

    /// Called once pagination is planned, before the first capture.
    fn on_pages_planned(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before a page slice is captured.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page has been captured and drawn.
    ///
    /// # Arguments
    /// * `raster_bytes`: encoded size of the captured bitmap
    fn on_page_complete(&self, page_num: usize, total_pages: usize, raster_bytes: usize) {
        let _ = (page_num, total_pages, raster_bytes);
    }

    /// Called once the artifact has been produced.
    fn on_export_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called once when the export fails, with the recorded error message.
    fn on_export_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExportProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExportConfig`].
pub type ProgressCallback = Arc<dyn ExportProgressCallback>;
