//! Isolation: a fixed-width, offscreen copy of the source document.
//!
//! Export must not disturb what the user is looking at, and breakpoints must
//! not depend on the live viewport's width. The copy is wrapped in a
//! container parked far outside the visible area but still attached to the
//! render tree, because detached nodes can be neither measured nor captured.
//!
//! [`IsolatedCopy`] owns the attached surface and detaches it on
//! [`IsolatedCopy::dispose`] or, failing that, on drop.

use crate::document::{Document, Element, NodeId};
use crate::error::ExportError;
use crate::host::{RenderHost, Surface};
use tracing::debug;

/// Horizontal offset that parks the wrapper outside the viewport.
pub const OFFSCREEN_LEFT_PX: i32 = -99_999;

/// Stacking order of the wrapper.
const WRAPPER_Z_INDEX: &str = "99999";

/// An offscreen, attached copy of a document.
pub struct IsolatedCopy {
    surface: Box<dyn Surface>,
    wrapper: NodeId,
    clone: NodeId,
}

impl IsolatedCopy {
    pub fn surface(&self) -> &dyn Surface {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> &mut dyn Surface {
        self.surface.as_mut()
    }

    pub fn document(&self) -> &Document {
        self.surface.document()
    }

    /// The wrapper element positioned outside the viewport.
    pub fn wrapper(&self) -> NodeId {
        self.wrapper
    }

    /// Root of the cloned subtree inside the wrapper.
    pub fn clone_root(&self) -> NodeId {
        self.clone
    }

    /// Detach the copy from the render tree. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.surface.is_attached() {
            self.surface.detach();
            debug!("Offscreen copy detached");
        }
    }
}

impl Drop for IsolatedCopy {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Clone `root` out of `source` into an offscreen wrapper of `width_px`
/// pixels and attach it through `host`.
pub fn isolate(
    host: &dyn RenderHost,
    source: &Document,
    root: NodeId,
    width_px: u32,
    background: &str,
) -> Result<IsolatedCopy, ExportError> {
    if source.element(root).is_none() {
        return Err(ExportError::RootNotFound(format!(
            "node #{} is not an element of the source document",
            root.index()
        )));
    }

    let width = format!("{width_px}px");
    let wrapper_el = Element::new("div")
        .with_style("position", "fixed")
        .with_style("left", format!("{OFFSCREEN_LEFT_PX}px"))
        .with_style("top", "0")
        .with_style("width", width.clone())
        .with_style("background", background)
        .with_style("z-index", WRAPPER_Z_INDEX);

    let mut doc = Document::new(wrapper_el);
    let wrapper = doc.root();
    let clone = doc
        .append_subtree(wrapper, source, root)
        .ok_or_else(|| ExportError::Internal("failed to clone export root".into()))?;

    if let Some(el) = doc.element_mut(clone) {
        el.set_style("width", width);
        el.set_style("margin", "0");
        el.set_style("box-shadow", "none");
        el.frame.width = width_px as f32;
    }
    if let Some(el) = doc.element_mut(wrapper) {
        el.frame.width = width_px as f32;
    }

    debug!(
        "Isolating {} nodes at {}px width",
        doc.len().saturating_sub(1),
        width_px
    );

    let surface = host
        .attach(doc)
        .map_err(|e| ExportError::Attach(e.to_string()))?;

    Ok(IsolatedCopy {
        surface,
        wrapper,
        clone,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHost, Probe};
    use std::sync::atomic::Ordering;

    fn source() -> Document {
        Document::from_json(
            r#"{ "tag": "div", "class": "cv",
                 "style": { "box-shadow": "0 0 8px #0003", "margin": "2rem auto", "width": "60%" },
                 "children": [ { "tag": "section" } ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn copy_is_fixed_width_and_offscreen() {
        let host = FakeHost::new();
        let src = source();
        let copy = isolate(&host, &src, src.root(), 794, "#fff").unwrap();

        let doc = copy.document();
        let wrapper = doc.element(copy.wrapper()).unwrap();
        assert_eq!(wrapper.style("position"), Some("fixed"));
        assert_eq!(wrapper.style("left"), Some("-99999px"));
        assert_eq!(wrapper.style("width"), Some("794px"));

        let clone = doc.element(copy.clone_root()).unwrap();
        assert!(clone.has_class("cv"));
        assert_eq!(clone.style("width"), Some("794px"));
        assert_eq!(clone.style("margin"), Some("0"));
        assert_eq!(clone.style("box-shadow"), Some("none"));

        // The source is untouched.
        let original = src.element(src.root()).unwrap();
        assert_eq!(original.style("width"), Some("60%"));
    }

    #[test]
    fn dispose_and_drop_detach_exactly_once() {
        let host = FakeHost::new();
        let src = source();

        let mut copy = isolate(&host, &src, src.root(), 794, "#fff").unwrap();
        copy.dispose();
        copy.dispose();
        drop(copy);
        assert_eq!(Probe::get(&host.probe.detached), 1);

        {
            let _copy = isolate(&host, &src, src.root(), 794, "#fff").unwrap();
        }
        assert_eq!(Probe::get(&host.probe.attached), 2);
        assert_eq!(Probe::get(&host.probe.detached), 2);
    }

    #[test]
    fn attach_failure_is_fatal() {
        let host = FakeHost::new();
        host.probe.refuse_attach.store(true, Ordering::SeqCst);
        let src = source();
        let err = isolate(&host, &src, src.root(), 794, "#fff").err().unwrap();
        assert!(matches!(err, ExportError::Attach(_)));
    }

    #[test]
    fn text_root_is_rejected() {
        let host = FakeHost::new();
        let mut src = source();
        let text = src.append_text(src.root(), "hi").unwrap();
        let err = isolate(&host, &src, text, 794, "#fff").err().unwrap();
        assert!(matches!(err, ExportError::RootNotFound(_)));
    }
}
