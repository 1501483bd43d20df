//! Breakpoint planning: where a page may end without cutting a block in half.
//!
//! Every element matched by one of the cut selectors contributes the offset
//! of its top edge, measured from the top of the export root. The list is
//! sorted, deduplicated and always ends with the root's total scroll height,
//! so the slicer can reach the end of the document.

use crate::document::{NodeId, Selector};
use crate::host::Surface;
use tracing::debug;

/// Breakpoints for one export, computed once and reused for every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakPlan {
    /// Ascending, distinct offsets; the last one is `total_height`.
    pub breakpoints: Vec<u32>,
    pub total_height: u32,
}

/// Measure `root` on `surface` and plan its breakpoints.
///
/// `scroll_y` is the viewport's scroll offset at measurement time; bounding
/// rects are in viewport coordinates, so both the root and each candidate are
/// shifted back into document coordinates before subtracting.
pub fn plan_breakpoints(
    surface: &dyn Surface,
    root: NodeId,
    selectors: &[Selector],
    scroll_y: f32,
) -> BreakPlan {
    let doc = surface.document();
    let root_top = surface
        .bounding_rect(root)
        .map(|r| r.top() + scroll_y)
        .unwrap_or(0.0);

    let mut offsets = Vec::new();
    for selector in selectors {
        for node in doc.select_all(root, selector) {
            let Some(rect) = surface.bounding_rect(node) else {
                continue;
            };
            let offset = (rect.top() + scroll_y - root_top).floor();
            if offset > 0.0 {
                offsets.push(offset as u32);
            }
        }
    }

    let total_height = surface.scroll_height(root).round().max(0.0) as u32;
    let breakpoints = normalize_breakpoints(offsets, total_height);
    debug!(
        "Planned {} breakpoints over {}px",
        breakpoints.len(),
        total_height
    );

    BreakPlan {
        breakpoints,
        total_height,
    }
}

/// Sort and dedup `offsets`, drop zero and anything at or past `total`, then
/// append `total` as the sentinel.
pub fn normalize_breakpoints(mut offsets: Vec<u32>, total: u32) -> Vec<u32> {
    offsets.retain(|&y| y > 0 && y < total);
    offsets.sort_unstable();
    offsets.dedup();
    offsets.push(total);
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::test_support::FakeSurface;

    fn selectors() -> Vec<Selector> {
        [".section-block", ".edu-item", "section"]
            .iter()
            .map(|s| Selector::parse(s))
            .collect()
    }

    fn cv() -> Document {
        Document::from_json(
            r#"{ "tag": "div", "frame": { "y": 100, "width": 794, "height": 2400 }, "children": [
                { "tag": "section", "frame": { "y": 100, "width": 794, "height": 200 } },
                { "tag": "div", "class": "section-block", "frame": { "y": 400, "width": 794, "height": 800 },
                  "children": [
                    { "tag": "div", "class": "edu-item", "frame": { "y": 400.7, "width": 794, "height": 100 } },
                    { "tag": "div", "class": "edu-item", "frame": { "y": 1200, "width": 794, "height": 80 } }
                  ] },
                { "tag": "section", "class": "section-block", "frame": { "y": 1280, "width": 794, "height": 1220 } }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn offsets_are_relative_sorted_distinct_with_sentinel() {
        let surface = FakeSurface::standalone(cv());
        let root = surface.doc.root();
        let plan = plan_breakpoints(&surface, root, &selectors(), 0.0);

        // The first section sits at the very top of the root and is dropped;
        // the first edu item floors onto its parent's offset.
        assert_eq!(plan.breakpoints, vec![300, 1100, 1180, 2400]);
        assert_eq!(plan.total_height, 2400);
    }

    #[test]
    fn scroll_offset_does_not_move_breakpoints() {
        let mut surface = FakeSurface::standalone(cv());
        surface.scroll = 350.0;
        let root = surface.doc.root();
        let plan = plan_breakpoints(&surface, root, &selectors(), 350.0);
        assert_eq!(plan.breakpoints, vec![300, 1100, 1180, 2400]);
    }

    #[test]
    fn document_without_candidates_has_only_the_sentinel() {
        let doc = Document::from_json(
            r#"{ "tag": "div", "frame": { "width": 794, "height": 640 } }"#,
        )
        .unwrap();
        let surface = FakeSurface::standalone(doc);
        let plan = plan_breakpoints(&surface, surface.doc.root(), &selectors(), 0.0);
        assert_eq!(plan.breakpoints, vec![640]);
    }

    #[test]
    fn normalize_keeps_sentinel_last() {
        assert_eq!(
            normalize_breakpoints(vec![900, 0, 300, 300, 1000, 1200], 1000),
            vec![300, 900, 1000]
        );
        assert_eq!(normalize_breakpoints(vec![], 0), vec![0]);
    }
}
