//! Image preparation: make every image in the isolated copy paintable.
//!
//! Raster capture snapshots whatever is decoded at that instant. An image
//! that is still loading, still decoding, or only reachable with credentials
//! the capturer lacks comes out blank. This pass walks the copy's images one
//! at a time, in document order, and leaves each one either inlined as a
//! `data:` URL or, if that fails, untouched.
//!
//! Images are processed sequentially on purpose: peak memory stays bounded to
//! one fetched payload and decode completion cannot race between images.

use crate::config::ExportConfig;
use crate::document::{Document, NodeId};
use crate::error::ImageSkip;
use crate::http::HttpFetch;
use crate::pipeline::inline::url_to_data_url;
use crate::pipeline::isolate::IsolatedCopy;
use crate::progress::ProgressCallback;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Attribute holding an image's source from before inlining.
pub const ORIGINAL_SRC_ATTR: &str = "data-original-src";

/// Result of preparing one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ImageOutcome {
    /// The source now is a self-contained `data:` URL.
    Inlined { node: usize },
    /// The image has no source; nothing to do.
    NoSource { node: usize },
    /// Inlining failed; the original source was kept.
    Skipped {
        node: usize,
        src: String,
        reason: ImageSkip,
    },
}

impl ImageOutcome {
    pub fn is_inlined(&self) -> bool {
        matches!(self, ImageOutcome::Inlined { .. })
    }
}

/// Prepare every image under the copy's clone root.
///
/// Never fails: per-image problems are reported as
/// [`ImageOutcome::Skipped`] and the pass moves on.
pub async fn prepare_images(
    copy: &mut IsolatedCopy,
    http: &dyn HttpFetch,
    config: &ExportConfig,
    progress: Option<&ProgressCallback>,
) -> Vec<ImageOutcome> {
    let root = copy.clone_root();
    let images = copy.document().images(root);
    let total = images.len();
    let mut outcomes = Vec::with_capacity(total);

    for (i, &node) in images.iter().enumerate() {
        let outcome = prepare_one(copy, node, http, config).await;
        if let Some(cb) = progress {
            cb.on_image_prepared(i + 1, total, outcome.is_inlined());
        }
        outcomes.push(outcome);
    }

    // Let fonts and reflow settle before anything gets measured or captured.
    sleep(config.settle_delay()).await;

    let inlined = outcomes.iter().filter(|o| o.is_inlined()).count();
    debug!("Prepared {} images ({} inlined)", total, inlined);
    outcomes
}

async fn prepare_one(
    copy: &mut IsolatedCopy,
    node: NodeId,
    http: &dyn HttpFetch,
    config: &ExportConfig,
) -> ImageOutcome {
    let surface = copy.surface_mut();

    if let Some(el) = surface.document_mut().element_mut(node) {
        el.set_attr("crossorigin", "anonymous");
    }

    if !surface.image_complete(node) {
        // Load errors resolve the wait too; the image just stays as it is.
        let status = surface.wait_image(node).await;
        debug!("Image #{} finished loading: {:?}", node.index(), status);
    }

    let src = surface
        .document()
        .element(node)
        .and_then(|el| el.attr("src"))
        .unwrap_or_default()
        .to_string();
    if src.is_empty() {
        return ImageOutcome::NoSource { node: node.index() };
    }

    if let Some(el) = surface.document_mut().element_mut(node) {
        el.set_attr(ORIGINAL_SRC_ATTR, src.clone());
    }

    match url_to_data_url(http, &src).await {
        Ok(data_url) => {
            if let Some(el) = surface.document_mut().element_mut(node) {
                el.set_attr("src", data_url);
            }
            match surface.decode_image(node).await {
                Some(Ok(())) => {}
                Some(Err(e)) => debug!("Decode of image #{} failed: {}", node.index(), e),
                None => sleep(config.decode_fallback()).await,
            }
            ImageOutcome::Inlined { node: node.index() }
        }
        Err(e) => {
            warn!("Image not inlinable, keeping src {}: {}", src, e);
            ImageOutcome::Skipped {
                node: node.index(),
                src,
                reason: e.into(),
            }
        }
    }
}

/// Write every recorded original source back and drop the markers.
///
/// Returns how many images were restored. Idempotent: a second call, or a
/// call on a document that was never prepared, restores nothing.
pub fn restore_images(doc: &mut Document, root: NodeId) -> usize {
    let mut restored = 0;
    for node in doc.images(root) {
        if let Some(el) = doc.element_mut(node) {
            if let Some(original) = el.remove_attr(ORIGINAL_SRC_ATTR) {
                el.set_attr("src", original);
                restored += 1;
            }
        }
    }
    restored
}
