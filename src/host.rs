//! Collaborator interfaces for the rendering environment.
//!
//! The export pipeline never lays out or paints anything itself. It asks a
//! [`RenderHost`] to attach a document to a live render tree, reads geometry
//! and image state back through the returned [`Surface`], and hands slices to
//! a [`RasterCapture`] implementation for painting.
//!
//! ```text
//! RenderHost::attach(Document) ──▶ Surface ──▶ RasterCapture::capture(slice) ──▶ Raster
//!                                  (measure, image load/decode, detach)
//! ```
//!
//! [`crate::scene::SceneHost`] implements all three for pre-laid-out scenes.

use crate::document::{Document, NodeId, Rect};
use async_trait::async_trait;
use serde::Serialize;

/// Failure reported by a render-host collaborator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// How a pending image load finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLoad {
    Loaded,
    Failed,
}

/// The environment documents are rendered in.
#[async_trait]
pub trait RenderHost: Send + Sync {
    /// Resolve once web fonts (or their equivalent) are loaded.
    ///
    /// Hosts without a font-loading signal keep the default, which returns
    /// immediately.
    async fn fonts_ready(&self) {}

    /// Current vertical scroll offset of the viewport, in pixels.
    fn scroll_offset(&self) -> f32 {
        0.0
    }

    /// Attach `document` to the render tree so it can be measured and
    /// captured. The surface owns the document until it is detached.
    fn attach(&self, document: Document) -> Result<Box<dyn Surface>, HostError>;
}

/// A document attached to a render tree.
#[async_trait]
pub trait Surface: Send + Sync {
    fn document(&self) -> &Document;

    /// Mutable access for attribute changes (image sources, markers).
    /// Implementations pick the changes up on the next measurement or paint.
    fn document_mut(&mut self) -> &mut Document;

    /// Border box of `node` in viewport coordinates.
    fn bounding_rect(&self, node: NodeId) -> Option<Rect>;

    /// Full scrollable height of `node`'s content.
    fn scroll_height(&self, node: NodeId) -> f32;

    /// Whether the image at `node` has finished its native load.
    fn image_complete(&self, node: NodeId) -> bool;

    /// Wait for the image at `node` to either load or fail.
    async fn wait_image(&self, node: NodeId) -> ImageLoad;

    /// Wait for the image at `node` to be decoded and paintable.
    ///
    /// Returns `None` when the host has no decode signal; callers then fall
    /// back to a fixed delay.
    async fn decode_image(&self, node: NodeId) -> Option<Result<(), HostError>>;

    /// Remove the document from the render tree. Must be idempotent.
    fn detach(&mut self);

    fn is_attached(&self) -> bool;
}

/// Options for a single raster capture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureOptions {
    /// Capture width in CSS pixels.
    pub width: u32,
    /// Capture height in CSS pixels.
    pub height: u32,
    /// Device-pixel scale factor; the raster is `width·scale × height·scale`.
    pub scale: f32,
    /// Left edge of the captured region, relative to the captured node.
    pub origin_x: f32,
    /// Top edge of the captured region, relative to the captured node.
    pub origin_y: f32,
    /// Background colour painted beneath the content.
    pub background: String,
    /// Viewport size the capture pretends to have.
    pub window_width: u32,
    pub window_height: u32,
    /// Fetch cross-origin images with CORS.
    pub use_cors: bool,
    /// Allow cross-origin images to taint the capture.
    pub allow_taint: bool,
}

/// Encoding of a captured raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl From<RasterFormat> for pdf_sheets::ImageKind {
    fn from(f: RasterFormat) -> Self {
        match f {
            RasterFormat::Png => pdf_sheets::ImageKind::Png,
            RasterFormat::Jpeg => pdf_sheets::ImageKind::Jpeg,
        }
    }
}

/// An encoded bitmap of one captured slice.
#[derive(Debug, Clone)]
pub struct Raster {
    /// Pixel width (capture width × scale).
    pub width: u32,
    /// Pixel height (capture height × scale).
    pub height: u32,
    pub format: RasterFormat,
    pub data: Vec<u8>,
}

/// Paints a region of an attached document into a bitmap.
#[async_trait]
pub trait RasterCapture: Send + Sync {
    async fn capture(
        &self,
        surface: &dyn Surface,
        node: NodeId,
        options: &CaptureOptions,
    ) -> Result<Raster, HostError>;
}
