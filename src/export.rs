//! Export orchestration: one document in, one paginated PDF out.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──▶ Exporting ──▶ Idle            (success)
//!                   └──▶ Failed{message} (any step failed)
//! ```
//!
//! The state lives in a [`tokio::sync::watch`] channel owned by the
//! [`Exporter`]; callers read it through [`Exporter::state`] or follow it
//! with [`Exporter::subscribe`]. Whatever happens inside an export, the
//! offscreen copy is detached and the state has left `Exporting` by the time
//! the returned future settles.
//!
//! ## Why measure once?
//!
//! Breakpoints and the total height are read a single time, before the first
//! capture. Re-measuring per page would let late reflow shift the cut points
//! between pages and produce overlapping or missing strips.

use crate::config::ExportConfig;
use crate::document::{Document, NodeId};
use crate::error::ExportError;
use crate::host::{CaptureOptions, RasterCapture, RenderHost};
use crate::http::HttpFetch;
use crate::pipeline::breakpoints::plan_breakpoints;
use crate::pipeline::images::{prepare_images, restore_images, ImageOutcome};
use crate::pipeline::isolate::{isolate, IsolatedCopy};
use crate::pipeline::slicer::{plan_slices, Slice};
use crate::progress::ProgressCallback;
use pdf_sheets::SheetDocument;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable export state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportState {
    #[default]
    Idle,
    Exporting,
    /// The last export failed; cleared when the next one starts.
    Failed { message: String },
}

impl ExportState {
    pub fn is_exporting(&self) -> bool {
        matches!(self, ExportState::Exporting)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExportState::Failed { message } => Some(message),
            _ => None,
        }
    }
}

/// Summary of one successful export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// Pages in the produced PDF.
    pub pages: usize,
    pub slices: Vec<Slice>,
    /// Total content height of the export root, in CSS pixels.
    pub total_height: u32,
    /// Content height of one page, in CSS pixels.
    pub capacity_px: u32,
    /// One entry per captured slice, as drawn on its page.
    pub placements: Vec<PagePlacement>,
    pub images: Vec<ImageOutcome>,
    /// Images whose original source was written back after capture.
    pub restored_images: usize,
    pub duration_ms: u64,
    /// Where the PDF was written; `None` for in-memory exports.
    pub path: Option<PathBuf>,
}

/// A page raster's position and size on its sheet, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PagePlacement {
    /// 1-based page number.
    pub page: usize,
    pub x_mm: f32,
    pub y_mm: f32,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl ExportReport {
    pub fn inlined_images(&self) -> usize {
        self.images.iter().filter(|o| o.is_inlined()).count()
    }

    pub fn skipped_images(&self) -> usize {
        self.images
            .iter()
            .filter(|o| matches!(o, ImageOutcome::Skipped { .. }))
            .count()
    }
}

/// Exports documents through a render host, a raster capturer and an HTTP
/// client.
///
/// One exporter runs one export at a time; a call made while another is in
/// flight fails fast with [`ExportError::ExportInProgress`] and leaves the
/// running export's state untouched.
pub struct Exporter {
    host: Arc<dyn RenderHost>,
    capture: Arc<dyn RasterCapture>,
    http: Arc<dyn HttpFetch>,
    config: ExportConfig,
    state: watch::Sender<ExportState>,
}

impl Exporter {
    pub fn new(
        host: Arc<dyn RenderHost>,
        capture: Arc<dyn RasterCapture>,
        http: Arc<dyn HttpFetch>,
        config: ExportConfig,
    ) -> Self {
        let (state, _) = watch::channel(ExportState::Idle);
        Self {
            host,
            capture,
            http,
            config,
            state,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn state(&self) -> ExportState {
        self.state.borrow().clone()
    }

    pub fn is_exporting(&self) -> bool {
        self.state.borrow().is_exporting()
    }

    /// Message of the last failed export, if the last export failed.
    pub fn export_error(&self) -> Option<String> {
        self.state.borrow().error().map(str::to_string)
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<ExportState> {
        self.state.subscribe()
    }

    /// Export the subtree at `root` and save it as a PDF.
    ///
    /// `filename` falls back to [`ExportConfig::default_filename`]. The file is
    /// written to a temporary sibling first and renamed into place, so a
    /// failed export never leaves a partial PDF behind.
    pub async fn export_document(
        &self,
        source: &Document,
        root: NodeId,
        filename: Option<&str>,
    ) -> Result<ExportReport, ExportError> {
        let guard = self.begin()?;
        let result = async {
            let (sheet, mut report) = self.render(source, root).await?;
            let path = PathBuf::from(
                filename
                    .filter(|f| !f.trim().is_empty())
                    .unwrap_or(&self.config.default_filename),
            );
            let bytes = serialize(sheet).await?;
            write_atomic(&path, &bytes).await?;
            info!("Saved {} pages to {}", report.pages, path.display());
            self.notify_complete(report.pages);
            report.path = Some(path);
            Ok::<_, ExportError>(report)
        }
        .await;
        guard.settle(result)
    }

    /// Export the subtree at `root` and return the PDF bytes.
    pub async fn export_bytes(
        &self,
        source: &Document,
        root: NodeId,
    ) -> Result<(Vec<u8>, ExportReport), ExportError> {
        let guard = self.begin()?;
        let result = async {
            let (sheet, report) = self.render(source, root).await?;
            let bytes = serialize(sheet).await?;
            self.notify_complete(report.pages);
            Ok::<_, ExportError>((bytes, report))
        }
        .await;
        guard.settle(result)
    }

    fn notify_complete(&self, pages: usize) {
        if let Some(cb) = &self.config.progress_callback {
            cb.on_export_complete(pages);
        }
    }

    fn begin(&self) -> Result<ExportGuard<'_>, ExportError> {
        let entered = self.state.send_if_modified(|state| {
            if state.is_exporting() {
                false
            } else {
                *state = ExportState::Exporting;
                true
            }
        });
        if !entered {
            return Err(ExportError::ExportInProgress);
        }
        Ok(ExportGuard {
            state: &self.state,
            progress: self.config.progress_callback.as_ref(),
            settled: false,
        })
    }

    /// Steps 1–7: everything up to, but not including, saving.
    async fn render(
        &self,
        source: &Document,
        root: NodeId,
    ) -> Result<(SheetDocument, ExportReport), ExportError> {
        let started = Instant::now();
        let config = &self.config;

        // ── Step 1: Fonts ────────────────────────────────────────────────────
        if tokio::time::timeout(config.font_ready_timeout(), self.host.fonts_ready())
            .await
            .is_err()
        {
            warn!(
                "Fonts not ready after {}ms, measuring anyway",
                config.font_ready_timeout_ms
            );
        }

        // ── Step 2: Isolate ──────────────────────────────────────────────────
        let mut copy = isolate(
            self.host.as_ref(),
            source,
            root,
            config.page_width_px,
            &config.background,
        )?;

        let result = self.paginate(&mut copy, started).await;
        copy.dispose();
        result
    }

    /// Steps 3–7 on an isolated copy. The caller disposes the copy.
    async fn paginate(
        &self,
        copy: &mut IsolatedCopy,
        started: Instant,
    ) -> Result<(SheetDocument, ExportReport), ExportError> {
        let config = &self.config;
        let progress = config.progress_callback.as_ref();
        let clone = copy.clone_root();

        // ── Step 3: Images ───────────────────────────────────────────────────
        if let Some(cb) = progress {
            cb.on_export_start(copy.document().images(clone).len());
        }
        let images = prepare_images(copy, self.http.as_ref(), config, progress).await;

        // ── Step 4: Artifact ─────────────────────────────────────────────────
        let mut sheet = SheetDocument::new(config.orientation, config.page_format);
        let page_width_mm = sheet.page_width_mm();

        // ── Step 5: Measure once ─────────────────────────────────────────────
        let plan = plan_breakpoints(
            copy.surface(),
            clone,
            &config.cut_selectors,
            self.host.scroll_offset(),
        );
        let capacity = config.page_capacity_px();
        let slices = plan_slices(
            &plan.breakpoints,
            plan.total_height,
            capacity,
            config.min_slice_px,
        );
        let total_pages = slices.len();
        info!(
            "Paginating {}px into {} pages ({}px per page, {} breakpoints)",
            plan.total_height,
            total_pages,
            capacity,
            plan.breakpoints.len()
        );
        if let Some(cb) = progress {
            cb.on_pages_planned(total_pages);
        }

        // ── Step 6: Capture and draw ─────────────────────────────────────────
        for (i, slice) in slices.iter().enumerate() {
            let page = i + 1;
            if let Some(cb) = progress {
                cb.on_page_start(page, total_pages);
            }

            let options = CaptureOptions {
                width: config.page_width_px,
                height: slice.height(),
                scale: config.capture_scale,
                origin_x: 0.0,
                origin_y: slice.start as f32,
                background: config.background.clone(),
                window_width: config.page_width_px,
                window_height: slice.height(),
                use_cors: true,
                allow_taint: true,
            };
            let raster = self
                .capture
                .capture(copy.surface(), clone, &options)
                .await
                .map_err(|e| ExportError::Capture {
                    page,
                    detail: e.to_string(),
                })?;
            if raster.width == 0 || raster.height == 0 {
                return Err(ExportError::Capture {
                    page,
                    detail: "capture returned an empty raster".into(),
                });
            }

            if i > 0 {
                sheet.add_page();
            }
            let draw_height = page_width_mm * raster.height as f32 / raster.width as f32;
            sheet.add_image(
                &raster.data,
                raster.format.into(),
                0.0,
                config.margin_y_mm,
                page_width_mm,
                draw_height,
            )?;
            debug!(
                "Page {}/{}: [{}, {}) → {}×{} px, {:.1}mm tall",
                page,
                total_pages,
                slice.start,
                slice.end,
                raster.width,
                raster.height,
                draw_height
            );
            if let Some(cb) = progress {
                cb.on_page_complete(page, total_pages, raster.data.len());
            }
        }

        // ── Step 7: Restore ──────────────────────────────────────────────────
        let restored_images = restore_images(copy.surface_mut().document_mut(), clone);

        let placements = (0..sheet.page_count())
            .flat_map(|i| {
                sheet.placements(i).iter().map(move |p| PagePlacement {
                    page: i + 1,
                    x_mm: p.x_mm,
                    y_mm: p.y_mm,
                    width_mm: p.w_mm,
                    height_mm: p.h_mm,
                })
            })
            .collect();

        let report = ExportReport {
            pages: sheet.page_count(),
            slices,
            placements,
            total_height: plan.total_height,
            capacity_px: capacity,
            images,
            restored_images,
            duration_ms: started.elapsed().as_millis() as u64,
            path: None,
        };
        Ok((sheet, report))
    }
}

/// Moves the state out of `Exporting` exactly once.
struct ExportGuard<'a> {
    state: &'a watch::Sender<ExportState>,
    progress: Option<&'a ProgressCallback>,
    settled: bool,
}

impl ExportGuard<'_> {
    fn settle<T>(mut self, result: Result<T, ExportError>) -> Result<T, ExportError> {
        self.settled = true;
        match &result {
            Ok(_) => {
                self.state.send_replace(ExportState::Idle);
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Export failed: {}", message);
                if let Some(cb) = self.progress {
                    cb.on_export_error(&message);
                }
                self.state.send_replace(ExportState::Failed { message });
            }
        }
        result
    }
}

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        // Reached without `settle` only when the export future was dropped.
        if !self.settled {
            self.state.send_replace(ExportState::Idle);
        }
    }
}

async fn serialize(sheet: SheetDocument) -> Result<Vec<u8>, ExportError> {
    let pages = sheet.page_count();
    let bytes = tokio::task::spawn_blocking(move || sheet.to_bytes())
        .await
        .map_err(|e| ExportError::Internal(format!("PDF serialisation task failed: {e}")))?;
    debug!("Serialised {} pages → {} bytes", pages, bytes.len());
    Ok(bytes)
}

/// Write to a temporary sibling, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    let write_err = |source| ExportError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, Raster, RasterFormat, Surface};
    use crate::progress::ExportProgressCallback;
    use crate::test_support::{FakeHost, FakeHttp, Probe};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records capture requests and returns a flat PNG of the right size.
    #[derive(Default)]
    struct RecordingCapture {
        requests: Mutex<Vec<CaptureOptions>>,
        fail_on_page: Option<usize>,
        states_seen: Mutex<Vec<bool>>,
        exporting: Mutex<Option<watch::Receiver<ExportState>>>,
    }

    #[async_trait]
    impl RasterCapture for RecordingCapture {
        async fn capture(
            &self,
            _surface: &dyn Surface,
            _node: NodeId,
            options: &CaptureOptions,
        ) -> Result<Raster, HostError> {
            let page = {
                let mut requests = self.requests.lock().unwrap();
                requests.push(options.clone());
                requests.len()
            };
            if let Some(rx) = self.exporting.lock().unwrap().as_ref() {
                self.states_seen.lock().unwrap().push(rx.borrow().is_exporting());
            }
            if self.fail_on_page == Some(page) {
                return Err(HostError::new("canvas is tainted"));
            }
            let w = (options.width as f32 * options.scale) as u32;
            let h = (options.height as f32 * options.scale) as u32;
            let png = pdf_sheets::encode_png(&image::RgbaImage::new(w.min(8), h.min(8))).unwrap();
            Ok(Raster {
                width: w,
                height: h,
                format: RasterFormat::Png,
                data: png,
            })
        }
    }

    /// 2400px tall root with blocks starting at 300, 1100 and 1180.
    fn cv() -> Document {
        Document::from_json(
            r#"{ "tag": "div", "class": "cv", "frame": { "width": 794, "height": 2400 }, "children": [
                { "tag": "section", "frame": { "y": 300, "width": 794, "height": 800 } },
                { "tag": "div", "class": "section-block", "frame": { "y": 1100, "width": 794, "height": 80 } },
                { "tag": "div", "class": "edu-item", "frame": { "y": 1180, "width": 794, "height": 1220 },
                  "children": [ { "tag": "img", "attrs": { "src": "/users/me/image" },
                                  "frame": { "y": 1200, "width": 100, "height": 100 } } ] }
            ] }"#,
        )
        .unwrap()
    }

    fn exporter(host: FakeHost, capture: Arc<RecordingCapture>, config: ExportConfig) -> Exporter {
        Exporter::new(
            Arc::new(host),
            capture,
            Arc::new(FakeHttp::new(Some("image/png"), b"img")),
            config,
        )
    }

    #[tokio::test]
    async fn paginates_along_block_boundaries() {
        let capture = Arc::new(RecordingCapture::default());
        let config = ExportConfig::builder()
            // 1050px pages: 277mm of content at 794px / 210mm is 1047px,
            // so stretch the content area a little.
            .margin_y_mm(9.6)
            .build()
            .unwrap();
        assert_eq!(config.page_capacity_px(), 1050);
        let exp = exporter(FakeHost::new(), Arc::clone(&capture), config);

        let doc = cv();
        let (bytes, report) = exp.export_bytes(&doc, doc.root()).await.unwrap();

        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(report.pages, 4);
        let bounds: Vec<(u32, u32)> = report.slices.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 300), (300, 1180), (1180, 2230), (2230, 2400)]);
        assert_eq!(report.inlined_images(), 1);
        assert_eq!(report.restored_images, 1);

        let requests = capture.requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        for (req, slice) in requests.iter().zip(&report.slices) {
            assert_eq!(req.width, 794);
            assert_eq!(req.height, slice.height());
            assert_eq!(req.origin_y, slice.start as f32);
            assert_eq!(req.scale, 2.0);
            assert!(req.use_cors && req.allow_taint);
        }
        assert_eq!(exp.state(), ExportState::Idle);
    }

    #[tokio::test]
    async fn each_slice_is_drawn_full_width_below_the_top_margin() {
        let capture = Arc::new(RecordingCapture::default());
        let exp = exporter(FakeHost::new(), Arc::clone(&capture), ExportConfig::default());

        let doc = cv();
        let (_, report) = exp.export_bytes(&doc, doc.root()).await.unwrap();

        let bounds: Vec<(u32, u32)> = report.slices.iter().map(|s| (s.start, s.end)).collect();
        assert_eq!(bounds, vec![(0, 300), (300, 1180), (1180, 2227), (2227, 2400)]);
        assert_eq!(report.placements.len(), 4);
        for (i, (placed, slice)) in report.placements.iter().zip(&report.slices).enumerate() {
            assert_eq!(placed.page, i + 1);
            assert_eq!((placed.x_mm, placed.y_mm, placed.width_mm), (0.0, 10.0, 210.0));
            let expected = 210.0 * slice.height() as f32 / 794.0;
            assert!((placed.height_mm - expected).abs() < 1e-3, "page {}", i + 1);
        }
        // A full 1047px page fills the 277mm content area.
        assert!((report.placements[2].height_mm - 276.93).abs() < 0.01);
        assert!(report.placements[3].height_mm < report.placements[2].height_mm);

        let requests = capture.requests.lock().unwrap();
        for (req, slice) in requests.iter().zip(&report.slices) {
            assert_eq!(req.window_width, 794);
            assert_eq!(req.window_height, slice.height());
        }
    }

    #[tokio::test]
    async fn state_is_exporting_only_while_running() {
        let capture = Arc::new(RecordingCapture::default());
        let exp = exporter(FakeHost::new(), Arc::clone(&capture), ExportConfig::default());
        *capture.exporting.lock().unwrap() = Some(exp.subscribe());

        assert!(!exp.is_exporting());
        let doc = cv();
        exp.export_bytes(&doc, doc.root()).await.unwrap();

        let seen = capture.states_seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&exporting| exporting));
        assert!(!exp.is_exporting());
        assert_eq!(exp.export_error(), None);
    }

    #[tokio::test]
    async fn capture_failure_is_recorded_and_copy_is_detached() {
        let host = FakeHost::new();
        let probe = Arc::clone(&host.probe);
        let capture = Arc::new(RecordingCapture {
            fail_on_page: Some(2),
            ..Default::default()
        });
        let exp = exporter(host, Arc::clone(&capture), ExportConfig::default());

        let doc = cv();
        let err = exp.export_bytes(&doc, doc.root()).await.unwrap_err();
        assert!(matches!(err, ExportError::Capture { page: 2, .. }));

        assert!(!exp.is_exporting());
        let message = exp.export_error().unwrap();
        assert!(message.contains("canvas is tainted"), "got: {message}");
        assert_eq!(Probe::get(&probe.attached), 1);
        assert_eq!(Probe::get(&probe.detached), 1);
        // Nothing after the failing page was captured.
        assert_eq!(capture.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn next_export_clears_previous_error() {
        let capture = Arc::new(RecordingCapture {
            fail_on_page: Some(1),
            ..Default::default()
        });
        let exp = exporter(FakeHost::new(), Arc::clone(&capture), ExportConfig::default());
        let doc = cv();
        assert!(exp.export_bytes(&doc, doc.root()).await.is_err());
        assert!(exp.export_error().is_some());

        // The failure was on the first request only.
        let (_, report) = exp.export_bytes(&doc, doc.root()).await.unwrap();
        assert!(report.pages > 0);
        assert_eq!(exp.state(), ExportState::Idle);
    }

    #[tokio::test]
    async fn attach_failure_surfaces_as_failed_state() {
        let host = FakeHost::new();
        host.probe.refuse_attach.store(true, Ordering::SeqCst);
        let exp = exporter(host, Arc::new(RecordingCapture::default()), ExportConfig::default());
        let doc = cv();
        let err = exp.export_bytes(&doc, doc.root()).await.unwrap_err();
        assert!(matches!(err, ExportError::Attach(_)));
        assert!(matches!(exp.state(), ExportState::Failed { .. }));
    }

    #[tokio::test]
    async fn concurrent_export_is_rejected_without_touching_state() {
        let exp = exporter(
            FakeHost::new(),
            Arc::new(RecordingCapture::default()),
            ExportConfig::default(),
        );
        exp.state.send_replace(ExportState::Exporting);

        let doc = cv();
        let err = exp.export_bytes(&doc, doc.root()).await.unwrap_err();
        assert!(matches!(err, ExportError::ExportInProgress));
        assert_eq!(exp.state(), ExportState::Exporting);
    }

    #[tokio::test]
    async fn progress_events_follow_the_pages() {
        #[derive(Default)]
        struct Counter {
            started: AtomicUsize,
            planned: AtomicUsize,
            completed: AtomicUsize,
        }
        impl ExportProgressCallback for Counter {
            fn on_export_start(&self, image_count: usize) {
                self.started.store(image_count, Ordering::SeqCst);
            }
            fn on_pages_planned(&self, total_pages: usize) {
                self.planned.store(total_pages, Ordering::SeqCst);
            }
            fn on_page_complete(&self, _page: usize, _total: usize, _bytes: usize) {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counter = Arc::new(Counter::default());
        let config = ExportConfig::builder()
            .progress_callback(Arc::clone(&counter) as ProgressCallback)
            .build()
            .unwrap();
        let exp = exporter(FakeHost::new(), Arc::new(RecordingCapture::default()), config);
        let doc = cv();
        let (_, report) = exp.export_bytes(&doc, doc.root()).await.unwrap();

        assert_eq!(counter.started.load(Ordering::SeqCst), 1);
        assert_eq!(counter.planned.load(Ordering::SeqCst), report.pages);
        assert_eq!(counter.completed.load(Ordering::SeqCst), report.pages);
    }

    #[tokio::test]
    async fn document_is_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("cv.pdf");
        let exp = exporter(
            FakeHost::new(),
            Arc::new(RecordingCapture::default()),
            ExportConfig::default(),
        );
        let doc = cv();
        let report = exp
            .export_document(&doc, doc.root(), path.to_str())
            .await
            .unwrap();

        assert_eq!(report.path.as_deref(), Some(path.as_path()));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(!path.with_extension("pdf.tmp").exists());
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_string(&ExportState::Failed {
            message: "boom".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"state":"failed","message":"boom"}"#);
    }
}
