//! Offline render host for pre-laid-out scenes.
//!
//! [`SceneHost`] lets the whole export pipeline run without a browser. Every
//! element already carries its layout frame, so "attaching" a document only
//! means remembering where its wrapper sits in the viewport, and "capturing"
//! a slice means painting element backgrounds and decoded images into an
//! RGBA canvas.
//!
//! ## What gets painted
//!
//! * the capture background
//! * `background` / `background-color` inline styles (`#rgb`, `#rrggbb`,
//!   `#rrggbbaa`, `white`, `black`, `transparent`), in document order
//! * images whose source is a base64 `data:` URL, scaled into their frame
//!
//! Text is never painted: layout and glyph rendering belong to whatever
//! produced the scene. Remote (non-inlined) images are left blank, exactly
//! like a tainted or failed fetch in a browser capture.

use crate::document::{Document, NodeId, Rect};
use crate::host::{
    CaptureOptions, HostError, ImageLoad, Raster, RasterCapture, RasterFormat, RenderHost, Surface,
};
use crate::pipeline::inline::is_inlined;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::{self, FilterType};
use image::{Pixel, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

static RE_DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^data:([^;,]*)((?:;[^;,]*)*),(.*)$").unwrap());

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

type ImageCache = Arc<Mutex<HashMap<Arc<str>, Arc<RgbaImage>>>>;

/// A [`RenderHost`] and [`RasterCapture`] over documents with known layout.
///
/// Decoded images are cached by source and shared between the host and every
/// surface it attaches, so an image decoded during preparation is not decoded
/// again for each page. A surface evicts the entries it decoded when it is
/// detached.
#[derive(Clone, Default)]
pub struct SceneHost {
    scroll: f32,
    images: ImageCache,
}

impl SceneHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the viewport is scrolled by `px`.
    pub fn with_scroll(mut self, px: f32) -> Self {
        self.scroll = px;
        self
    }

    /// Number of decoded images held in the cache.
    pub fn cached_images(&self) -> usize {
        lock(&self.images).len()
    }
}

impl fmt::Debug for SceneHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneHost")
            .field("scroll", &self.scroll)
            .field("cached_images", &self.cached_images())
            .finish()
    }
}

impl RenderHost for SceneHost {
    fn scroll_offset(&self) -> f32 {
        self.scroll
    }

    fn attach(&self, document: Document) -> Result<Box<dyn Surface>, HostError> {
        let wrapper = document
            .element(document.root())
            .ok_or_else(|| HostError::new("document has no root element"))?;
        // The wrapper is positioned `fixed`: its inline offsets are viewport
        // coordinates and do not move with the scroll position.
        let offset_x = wrapper.style("left").and_then(parse_px).unwrap_or(0.0);
        let offset_y = wrapper.style("top").and_then(parse_px).unwrap_or(0.0);
        debug!("Attached scene at ({}, {})", offset_x, offset_y);

        Ok(Box::new(SceneSurface {
            doc: document,
            offset_x,
            offset_y,
            attached: true,
            images: Arc::clone(&self.images),
            decoded: Mutex::new(Vec::new()),
        }))
    }
}

#[async_trait]
impl RasterCapture for SceneHost {
    async fn capture(
        &self,
        surface: &dyn Surface,
        node: NodeId,
        options: &CaptureOptions,
    ) -> Result<Raster, HostError> {
        if !surface.is_attached() {
            return Err(HostError::new("cannot capture a detached surface"));
        }
        if options.width == 0 || options.height == 0 || !(options.scale > 0.0) {
            return Err(HostError::new(format!(
                "empty capture region {}×{} at scale {}",
                options.width, options.height, options.scale
            )));
        }
        let subtree = surface
            .document()
            .clone_subtree(node)
            .ok_or_else(|| HostError::new(format!("node #{} is not capturable", node.index())))?;

        let options = options.clone();
        let images = Arc::clone(&self.images);
        // Painting and PNG encoding are CPU-bound.
        tokio::task::spawn_blocking(move || paint(&subtree, &options, &images))
            .await
            .map_err(|e| HostError::new(format!("capture task failed: {e}")))?
    }
}

/// A scene attached by [`SceneHost`].
pub struct SceneSurface {
    doc: Document,
    offset_x: f32,
    offset_y: f32,
    attached: bool,
    images: ImageCache,
    /// Cache keys this surface inserted.
    decoded: Mutex<Vec<Arc<str>>>,
}

#[async_trait]
impl Surface for SceneSurface {
    fn document(&self) -> &Document {
        &self.doc
    }

    fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        self.doc
            .element(node)
            .map(|el| el.frame.translate(self.offset_x, self.offset_y))
    }

    fn scroll_height(&self, node: NodeId) -> f32 {
        let Some(frame) = self.doc.element(node).map(|el| el.frame) else {
            return 0.0;
        };
        self.doc
            .descendants(node)
            .into_iter()
            .filter_map(|n| self.doc.element(n))
            .map(|el| el.frame.bottom() - frame.top())
            .fold(frame.height, f32::max)
    }

    fn image_complete(&self, _node: NodeId) -> bool {
        // Scenes carry no pending network loads.
        true
    }

    async fn wait_image(&self, _node: NodeId) -> ImageLoad {
        ImageLoad::Loaded
    }

    async fn decode_image(&self, node: NodeId) -> Option<Result<(), HostError>> {
        let src = self.doc.element(node)?.attr("src")?.to_string();
        if !is_inlined(&src) {
            return Some(Err(HostError::new("remote image is not paintable offline")));
        }

        let key: Arc<str> = Arc::from(src);
        if lock(&self.images).contains_key(&key) {
            return Some(Ok(()));
        }

        let src = Arc::clone(&key);
        let decoded = tokio::task::spawn_blocking(move || decode_data_url(&src))
            .await
            .map_err(|e| HostError::new(format!("decode task failed: {e}")))
            .and_then(|r| r);
        Some(decoded.map(|img| {
            if lock(&self.images).insert(Arc::clone(&key), Arc::new(img)).is_none() {
                lock(&self.decoded).push(key);
            }
        }))
    }

    fn detach(&mut self) {
        let decoded = self
            .decoded
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !decoded.is_empty() {
            let mut images = lock(&self.images);
            for key in decoded.drain(..) {
                images.remove(&key);
            }
        }
        self.attached = false;
    }

    fn is_attached(&self) -> bool {
        self.attached
    }
}

// ── Painting ────────────────────────────────────────────────────────────────

fn paint(doc: &Document, options: &CaptureOptions, images: &ImageCache) -> Result<Raster, HostError> {
    let root = doc
        .element(doc.root())
        .map(|el| el.frame)
        .unwrap_or_default();
    let scale = options.scale;
    let width = ((options.width as f32) * scale).round().max(1.0) as u32;
    let height = ((options.height as f32) * scale).round().max(1.0) as u32;
    let background = parse_color(&options.background).unwrap_or(WHITE);
    let mut canvas = RgbaImage::from_pixel(width, height, background);

    let origin_x = root.x + options.origin_x;
    let origin_y = root.y + options.origin_y;

    for id in doc.descendants(doc.root()) {
        let Some(el) = doc.element(id) else {
            continue;
        };
        let x = ((el.frame.x - origin_x) * scale).round() as i64;
        let y = ((el.frame.y - origin_y) * scale).round() as i64;
        let w = (el.frame.width * scale).round() as i64;
        let h = (el.frame.height * scale).round() as i64;
        if w <= 0 || h <= 0 || y >= height as i64 || y + h <= 0 || x >= width as i64 || x + w <= 0 {
            continue;
        }

        let fill = el
            .style("background-color")
            .or_else(|| el.style("background"))
            .and_then(parse_color);
        if let Some(color) = fill {
            fill_rect(&mut canvas, x, y, w, h, color);
        }

        if el.is_image() {
            if let Some(img) = el.attr("src").and_then(|src| cached_or_decode(images, src)) {
                let scaled = imageops::resize(&*img, w as u32, h as u32, FilterType::Triangle);
                imageops::overlay(&mut canvas, &scaled, x, y);
            }
        }
    }

    let data = pdf_sheets::encode_png(&canvas).map_err(|e| HostError::new(e.to_string()))?;
    debug!("Painted {}×{} slice → {} bytes PNG", width, height, data.len());
    Ok(Raster {
        width,
        height,
        format: RasterFormat::Png,
        data,
    })
}

fn fill_rect(canvas: &mut RgbaImage, x: i64, y: i64, w: i64, h: i64, color: Rgba<u8>) {
    let x0 = x.max(0) as u32;
    let y0 = y.max(0) as u32;
    let x1 = (x + w).min(canvas.width() as i64) as u32;
    let y1 = (y + h).min(canvas.height() as i64) as u32;
    for py in y0..y1 {
        for px in x0..x1 {
            canvas.get_pixel_mut(px, py).blend(&color);
        }
    }
}

fn cached_or_decode(images: &ImageCache, src: &str) -> Option<Arc<RgbaImage>> {
    if !is_inlined(src) {
        return None;
    }
    if let Some(img) = lock(images).get(src) {
        return Some(Arc::clone(img));
    }
    // Images that skipped the decode signal are painted but not cached.
    match decode_data_url(src) {
        Ok(img) => Some(Arc::new(img)),
        Err(e) => {
            debug!("Skipping undecodable image: {}", e);
            None
        }
    }
}

// ── Parsing helpers ─────────────────────────────────────────────────────────

/// Decode a base64 `data:` URL into pixels.
pub fn decode_data_url(src: &str) -> Result<RgbaImage, HostError> {
    let caps = RE_DATA_URL
        .captures(src)
        .ok_or_else(|| HostError::new("not a data URL"))?;
    let is_base64 = caps
        .get(2)
        .is_some_and(|p| p.as_str().split(';').any(|s| s.eq_ignore_ascii_case("base64")));
    if !is_base64 {
        return Err(HostError::new("only base64 data URLs carry image bytes"));
    }
    let payload = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| HostError::new(format!("invalid base64: {e}")))?;
    let img = image::load_from_memory(&bytes).map_err(|e| HostError::new(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Parse a CSS colour in one of the forms the painter understands.
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let value = value.trim();
    match value.to_ascii_lowercase().as_str() {
        "white" => return Some(WHITE),
        "black" => return Some(Rgba([0, 0, 0, 255])),
        "transparent" | "none" => return Some(Rgba([0, 0, 0, 0])),
        _ => {}
    }

    let hex = value.strip_prefix('#')?;
    let nibble = |i: usize| u8::from_str_radix(hex.get(i..i + 1)?, 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        4 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?])),
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

/// Parse a `px` length such as `-99999px` or `0`.
fn parse_px(value: &str) -> Option<f32> {
    let value = value.trim();
    value.strip_suffix("px").unwrap_or(value).trim().parse().ok()
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
