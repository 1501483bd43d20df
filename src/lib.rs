//! # cv-export
//!
//! Turn a laid-out, variable-height CV document into a multi-page A4 PDF
//! without cutting sections in half.
//!
//! ## Why this crate?
//!
//! A CV on screen is one long column. Printing it naively chops headings from
//! their content and splits photos across pages, and capturing it in place
//! flashes the live view and depends on whatever width the window happens to
//! have. This crate exports an offscreen, fixed-width copy instead: images are
//! inlined through the authenticated API first, page breaks are chosen on
//! block boundaries, and each page is a raster capture of exactly one slice.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document
//!  │
//!  ├─ 1. Fonts        wait (bounded) for the host's font-ready signal
//!  ├─ 2. Isolate      clone the root into an offscreen 794px wrapper
//!  ├─ 3. Images       load, inline as data: URLs, decode (one at a time)
//!  ├─ 4. Artifact     new A4 portrait PDF
//!  ├─ 5. Breakpoints  block top offsets + total height, measured once
//!  ├─ 6. Slices       capture each slice at 2×, one per page, 10mm margin
//!  ├─ 7. Restore      put original image sources back
//!  └─ 8. Save         temp file + rename
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cv_export::{ApiClient, Document, ExportConfig, Exporter, HttpConfig, SceneHost};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scene = Document::load("cv.json")?;
//!     let host = Arc::new(SceneHost::new());
//!     let http = ApiClient::new(HttpConfig::new("https://api.example.com").with_token("…"))?;
//!
//!     let exporter = Exporter::new(host.clone(), host, Arc::new(http), ExportConfig::default());
//!     let report = exporter.export_document(&scene, scene.root(), Some("cv.pdf")).await?;
//!     eprintln!("{} pages, {} images inlined", report.pages, report.inlined_images());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cv-export` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! cv-export = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod host;
pub mod http;
pub mod pipeline;
pub mod progress;
pub mod scene;

#[cfg(test)]
mod test_support;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExportConfig, ExportConfigBuilder, HttpConfig};
pub use document::{Document, Element, NodeId, Rect, Selector};
pub use error::{ExportError, ImageSkip};
pub use export::{ExportReport, ExportState, Exporter, PagePlacement};
pub use host::{CaptureOptions, HostError, Raster, RasterCapture, RasterFormat, RenderHost, Surface};
pub use http::{ApiClient, Fetched, HttpFetch};
pub use pdf_sheets::{Orientation, PageFormat};
pub use pipeline::images::ImageOutcome;
pub use pipeline::slicer::Slice;
pub use progress::{ExportProgressCallback, NoopProgressCallback, ProgressCallback};
pub use scene::SceneHost;
