//! Page slicing: turn breakpoints plus a fixed page capacity into pages.
//!
//! Each page ends on the largest breakpoint that still fits, provided it
//! leaves at least `min_slice` pixels on the page. When no breakpoint fits
//! (a block taller than a page, or one that would leave a sliver) the page is
//! cut hard at capacity. Either way the cursor strictly advances, so slicing
//! always terminates and the slices tile `[0, total)` without gaps.

use serde::Serialize;

/// One page worth of document: the half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slice {
    pub start: u32,
    pub end: u32,
}

impl Slice {
    pub fn height(&self) -> u32 {
        self.end - self.start
    }
}

/// Where the page starting at `start` ends.
///
/// `breakpoints` must be ascending. The result always satisfies
/// `start < end <= total` when `start < total` and `capacity > 0`.
pub fn next_break(start: u32, breakpoints: &[u32], total: u32, capacity: u32, min_slice: u32) -> u32 {
    let limit = start.saturating_add(capacity);
    let floor = start.saturating_add(min_slice);

    let mut best = None;
    for &y in breakpoints {
        if y > limit {
            break;
        }
        if y > floor {
            best = Some(y);
        }
    }

    best.unwrap_or_else(|| limit.min(total))
}

/// Slice `[0, total)` into pages.
pub fn plan_slices(breakpoints: &[u32], total: u32, capacity: u32, min_slice: u32) -> Vec<Slice> {
    let mut slices = Vec::new();
    if capacity == 0 {
        return slices;
    }

    let mut start = 0;
    while start < total {
        let end = next_break(start, breakpoints, total, capacity, min_slice).min(total);
        slices.push(Slice { start, end });
        start = end;
    }
    slices
}
