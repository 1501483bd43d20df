//! Configuration types for paginated export.
//!
//! All export behaviour is controlled through [`ExportConfig`], built via its
//! [`ExportConfigBuilder`]. Network behaviour of the image fetcher lives in a
//! separate [`HttpConfig`] because it belongs to the HTTP collaborator, not to
//! the pagination pipeline.
//!
//! The numeric knobs here (minimum slice height, fallback delays, font wait)
//! are policy parameters. Their defaults work well for typical CV layouts but
//! none of them is load-bearing for correctness: pagination terminates and
//! covers the whole document for any positive page capacity.

use crate::document::Selector;
use crate::error::ExportError;
use crate::progress::ProgressCallback;
use pdf_sheets::{Orientation, PageFormat};
use std::fmt;
use std::time::Duration;

/// Default pixel width of the isolated copy (A4 at 96 CSS px per inch).
pub const DEFAULT_PAGE_WIDTH_PX: u32 = 794;

/// Default selectors marking page-safe cut points.
pub const DEFAULT_CUT_SELECTORS: [&str; 3] = [".section-block", ".edu-item", "section"];

/// Configuration for a single-document export.
///
/// Built via [`ExportConfig::builder()`] or using [`ExportConfig::default()`].
///
/// # Example
/// ```rust
/// use cv_export::ExportConfig;
///
/// let config = ExportConfig::builder()
///     .margin_y_mm(12.0)
///     .capture_scale(3.0)
///     .build()
///     .unwrap();
/// assert_eq!(config.page_capacity_px(), 1032);
/// ```
#[derive(Clone)]
pub struct ExportConfig {
    /// Fixed pixel width of the isolated copy and of every capture. Default: 794.
    ///
    /// Matching this width to the physical page width fixes the
    /// pixel-per-millimetre ratio for the whole export.
    pub page_width_px: u32,

    /// Physical page size (portrait). Default: A4, 210 × 297 mm.
    pub page_format: PageFormat,

    /// Page orientation. Default: portrait.
    pub orientation: Orientation,

    /// Top and bottom margin in millimetres. No left/right margin is applied;
    /// captures span the full page width. Default: 10.
    pub margin_y_mm: f32,

    /// Device-pixel scale factor passed to raster capture. Default: 2.0.
    pub capture_scale: f32,

    /// Minimum slice height in pixels when cutting on a breakpoint. Default: 50.
    pub min_slice_px: u32,

    /// Delay used when an image exposes no decode signal. Default: 30 ms.
    pub decode_fallback_ms: u64,

    /// Delay after image preparation, letting layout settle. Default: 60 ms.
    pub settle_delay_ms: u64,

    /// Upper bound on waiting for the host's font-ready signal. Default: 3000 ms.
    pub font_ready_timeout_ms: u64,

    /// Selectors for page-safe cut points, queried in order.
    pub cut_selectors: Vec<Selector>,

    /// Background colour of the offscreen wrapper and of captures. Default: `#ffffff`.
    pub background: String,

    /// File name used when the caller does not supply one. Default: `cv.pdf`.
    pub default_filename: String,

    /// Optional progress callback for live per-page events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_width_px: DEFAULT_PAGE_WIDTH_PX,
            page_format: PageFormat::A4,
            orientation: Orientation::Portrait,
            margin_y_mm: 10.0,
            capture_scale: 2.0,
            min_slice_px: 50,
            decode_fallback_ms: 30,
            settle_delay_ms: 60,
            font_ready_timeout_ms: 3000,
            cut_selectors: DEFAULT_CUT_SELECTORS
                .iter()
                .map(|s| Selector::parse(s))
                .collect(),
            background: "#ffffff".to_string(),
            default_filename: "cv.pdf".to_string(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportConfig")
            .field("page_width_px", &self.page_width_px)
            .field("page_format", &self.page_format)
            .field("orientation", &self.orientation)
            .field("margin_y_mm", &self.margin_y_mm)
            .field("capture_scale", &self.capture_scale)
            .field("min_slice_px", &self.min_slice_px)
            .field("decode_fallback_ms", &self.decode_fallback_ms)
            .field("settle_delay_ms", &self.settle_delay_ms)
            .field("font_ready_timeout_ms", &self.font_ready_timeout_ms)
            .field("cut_selectors", &self.cut_selectors)
            .field("background", &self.background)
            .field("default_filename", &self.default_filename)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ExportProgressCallback>"),
            )
            .finish()
    }
}

impl ExportConfig {
    /// Create a new builder for `ExportConfig`.
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder {
            config: Self::default(),
        }
    }

    /// Page width and height in millimetres with orientation applied.
    pub fn page_size_mm(&self) -> (f32, f32) {
        self.page_format.oriented(self.orientation)
    }

    /// Printable height between the top and bottom margins, in millimetres.
    pub fn content_height_mm(&self) -> f32 {
        self.page_size_mm().1 - 2.0 * self.margin_y_mm
    }

    /// Pixels per millimetre implied by mapping `page_width_px` onto the page width.
    pub fn px_per_mm(&self) -> f32 {
        self.page_width_px as f32 / self.page_size_mm().0
    }

    /// Vertical pixels that fit on one page between the margins.
    pub fn page_capacity_px(&self) -> u32 {
        (self.content_height_mm() * self.px_per_mm()).floor().max(0.0) as u32
    }

    pub(crate) fn decode_fallback(&self) -> Duration {
        Duration::from_millis(self.decode_fallback_ms)
    }

    pub(crate) fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub(crate) fn font_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.font_ready_timeout_ms)
    }
}

/// Builder for [`ExportConfig`].
#[derive(Debug)]
pub struct ExportConfigBuilder {
    config: ExportConfig,
}

impl ExportConfigBuilder {
    pub fn page_width_px(mut self, px: u32) -> Self {
        self.config.page_width_px = px;
        self
    }

    pub fn page_format(mut self, format: PageFormat) -> Self {
        self.config.page_format = format;
        self
    }

    pub fn orientation(mut self, orientation: Orientation) -> Self {
        self.config.orientation = orientation;
        self
    }

    pub fn margin_y_mm(mut self, mm: f32) -> Self {
        self.config.margin_y_mm = mm.max(0.0);
        self
    }

    pub fn capture_scale(mut self, scale: f32) -> Self {
        self.config.capture_scale = scale.clamp(0.25, 8.0);
        self
    }

    pub fn min_slice_px(mut self, px: u32) -> Self {
        self.config.min_slice_px = px;
        self
    }

    pub fn decode_fallback_ms(mut self, ms: u64) -> Self {
        self.config.decode_fallback_ms = ms;
        self
    }

    pub fn settle_delay_ms(mut self, ms: u64) -> Self {
        self.config.settle_delay_ms = ms;
        self
    }

    pub fn font_ready_timeout_ms(mut self, ms: u64) -> Self {
        self.config.font_ready_timeout_ms = ms;
        self
    }

    /// Replace the cut-point selectors (`.class` or `tag`).
    pub fn cut_selectors<I, S>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.cut_selectors = selectors
            .into_iter()
            .map(|s| Selector::parse(s.as_ref()))
            .collect();
        self
    }

    pub fn background(mut self, color: impl Into<String>) -> Self {
        self.config.background = color.into();
        self
    }

    pub fn default_filename(mut self, name: impl Into<String>) -> Self {
        self.config.default_filename = name.into();
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExportConfig, ExportError> {
        let c = &self.config;
        if c.page_width_px == 0 {
            return Err(ExportError::InvalidConfig(
                "page width must be at least 1px".into(),
            ));
        }
        let (w_mm, h_mm) = c.page_size_mm();
        if !(w_mm > 0.0 && h_mm > 0.0) {
            return Err(ExportError::InvalidConfig(format!(
                "page format must be positive, got {w_mm}×{h_mm} mm"
            )));
        }
        if c.content_height_mm() <= 0.0 {
            return Err(ExportError::InvalidConfig(format!(
                "margins of {}mm leave no printable height on a {}mm page",
                c.margin_y_mm, h_mm
            )));
        }
        if c.page_capacity_px() == 0 {
            return Err(ExportError::InvalidConfig(
                "page capacity rounds down to 0px".into(),
            ));
        }
        if c.default_filename.trim().is_empty() {
            return Err(ExportError::InvalidConfig(
                "default filename must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

/// Configuration of the authenticated HTTP collaborator.
#[derive(Clone, Default)]
pub struct HttpConfig {
    /// Base URL that relative image paths are resolved against.
    pub base_url: Option<String>,

    /// Bearer token sent as `Authorization: Bearer <token>`.
    pub bearer_token: Option<String>,

    /// Per-request timeout in seconds. `0` means the default of 15.
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.bearer_token = (!token.is_empty()).then_some(token);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn effective_timeout_secs(&self) -> u64 {
        if self.timeout_secs == 0 {
            Self::DEFAULT_TIMEOUT_SECS
        } else {
            self.timeout_secs
        }
    }
}

impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.effective_timeout_secs())
            .finish()
    }
}
