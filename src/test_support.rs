//! In-memory collaborators shared by unit tests.

use crate::document::{Document, NodeId, Rect};
use crate::error::ExportError;
use crate::host::{HostError, ImageLoad, RenderHost, Surface};
use crate::http::{Fetched, HttpFetch};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts what the fakes were asked to do.
#[derive(Default)]
pub(crate) struct Probe {
    pub attached: AtomicUsize,
    pub detached: AtomicUsize,
    pub waits: AtomicUsize,
    pub decodes: AtomicUsize,
    pub refuse_attach: AtomicBool,
}

impl Probe {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Host whose surfaces report frames as-is, shifted by a scroll offset.
pub(crate) struct FakeHost {
    pub probe: Arc<Probe>,
    pub scroll: f32,
    pub pending_images: bool,
    pub decode_signal: bool,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(Probe::default()),
            scroll: 0.0,
            pending_images: false,
            decode_signal: true,
        }
    }
}

impl RenderHost for FakeHost {
    fn scroll_offset(&self) -> f32 {
        self.scroll
    }

    fn attach(&self, document: Document) -> Result<Box<dyn Surface>, HostError> {
        if self.probe.refuse_attach.load(Ordering::SeqCst) {
            return Err(HostError::new("cannot allocate offscreen container"));
        }
        self.probe.attached.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSurface {
            doc: document,
            attached: true,
            probe: Arc::clone(&self.probe),
            scroll: self.scroll,
            pending_images: self.pending_images,
            decode_signal: self.decode_signal,
        }))
    }
}

pub(crate) struct FakeSurface {
    pub doc: Document,
    pub attached: bool,
    pub probe: Arc<Probe>,
    pub scroll: f32,
    pub pending_images: bool,
    pub decode_signal: bool,
}

impl FakeSurface {
    pub fn standalone(doc: Document) -> Self {
        Self {
            doc,
            attached: true,
            probe: Arc::new(Probe::default()),
            scroll: 0.0,
            pending_images: false,
            decode_signal: true,
        }
    }
}

#[async_trait]
impl Surface for FakeSurface {
    fn document(&self) -> &Document {
        &self.doc
    }

    fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    fn bounding_rect(&self, node: NodeId) -> Option<Rect> {
        self.doc
            .element(node)
            .map(|el| el.frame.translate(0.0, -self.scroll))
    }

    fn scroll_height(&self, node: NodeId) -> f32 {
        let Some(top) = self.doc.element(node).map(|el| el.frame.top()) else {
            return 0.0;
        };
        self.doc
            .descendants(node)
            .into_iter()
            .filter_map(|n| self.doc.element(n))
            .map(|el| el.frame.bottom() - top)
            .fold(0.0, f32::max)
    }

    fn image_complete(&self, _node: NodeId) -> bool {
        !self.pending_images
    }

    async fn wait_image(&self, _node: NodeId) -> ImageLoad {
        self.probe.waits.fetch_add(1, Ordering::SeqCst);
        ImageLoad::Loaded
    }

    async fn decode_image(&self, _node: NodeId) -> Option<Result<(), HostError>> {
        self.probe.decodes.fetch_add(1, Ordering::SeqCst);
        self.decode_signal.then_some(Ok(()))
    }

    fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            self.probe.detached.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_attached(&self) -> bool {
        self.attached
    }
}

/// HTTP fake: URLs containing `missing` fail, everything else returns `body`.
pub(crate) struct FakeHttp {
    pub calls: AtomicUsize,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

impl FakeHttp {
    pub fn new(content_type: Option<&str>, body: &[u8]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            body: body.to_vec(),
            content_type: content_type.map(str::to_string),
        }
    }
}

#[async_trait]
impl HttpFetch for FakeHttp {
    async fn fetch_binary(&self, url: &str) -> Result<Fetched, ExportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("missing") {
            return Err(ExportError::ImageFetch {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".into(),
            });
        }
        Ok(Fetched {
            bytes: self.body.clone(),
            content_type: self.content_type.clone(),
        })
    }
}
