//! Error types for the cv-export library.
//!
//! Two distinct types reflect two distinct failure modes:
//!
//! * [`ExportError`] is **fatal**: the export cannot produce an artifact
//!   (collaborator failure, capture failure, bad configuration). Returned as
//!   `Err(ExportError)` from [`crate::Exporter`] entry points and mirrored in
//!   [`crate::ExportState::Failed`].
//!
//! * [`ImageSkip`] is **non-fatal**: a single image could not be inlined. The
//!   image keeps its original source and the export carries on; the reason is
//!   stored in [`crate::pipeline::images::ImageOutcome::Skipped`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the cv-export library.
#[derive(Debug, Error)]
pub enum ExportError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The scene file could not be read.
    #[error("Failed to read scene '{path}': {source}")]
    SceneRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scene JSON is malformed or structurally invalid.
    #[error("Invalid scene: {0}")]
    InvalidScene(String),

    /// The requested export root does not exist in the source document.
    #[error("Export root not found: {0}")]
    RootNotFound(String),

    // ── Image inlining errors ─────────────────────────────────────────────
    /// Fetching an image through the HTTP collaborator failed.
    #[error("Failed to fetch image '{url}': {reason}")]
    ImageFetch { url: String, reason: String },

    /// The image fetch exceeded the configured timeout.
    #[error("Image fetch timed out after {secs}s for '{url}'")]
    ImageFetchTimeout { url: String, secs: u64 },

    /// Converting fetched bytes into a data URL failed.
    #[error("Failed to encode image '{url}': {detail}")]
    ImageEncode { url: String, detail: String },

    // ── Render host errors ────────────────────────────────────────────────
    /// The isolated copy could not be attached to the render tree.
    #[error("Failed to attach offscreen copy: {0}")]
    Attach(String),

    /// Raster capture of a slice failed.
    #[error("Raster capture failed for page {page}: {detail}")]
    Capture { page: usize, detail: String },

    // ── Output errors ─────────────────────────────────────────────────────
    /// The PDF writer rejected a page image.
    #[error("PDF assembly failed: {0}")]
    Artifact(#[from] pdf_sheets::SheetError),

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config / state errors ─────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Another export is still running on the same exporter.
    #[error("An export is already in progress")]
    ExportInProgress,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a single image was left with its original source.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImageSkip {
    /// The remote resource could not be fetched.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The fetched payload could not be turned into a data URL.
    #[error("encode failed: {0}")]
    Encode(String),
}

impl From<ExportError> for ImageSkip {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::ImageEncode { .. } => ImageSkip::Encode(e.to_string()),
            other => ImageSkip::Fetch(other.to_string()),
        }
    }
}
