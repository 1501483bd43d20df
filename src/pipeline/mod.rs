//! Pipeline stages for document-to-PDF export.
//!
//! Each submodule implements exactly one step. The orchestrator in
//! [`crate::export`] sequences them and owns the resources they share.
//!
//! ## Data Flow
//!
//! ```text
//! source ──▶ isolate ──▶ images ──▶ breakpoints ──▶ slicer ──▶ capture + draw
//! (live)     (offscreen   (inline +   (safe cut     (page
//!             copy)        decode)     offsets)      intervals)
//! ```
//!
//! 1. [`isolate`]: clone the export root into a fixed-width offscreen
//!    wrapper so measurement never depends on, or disturbs, the live view
//! 2. [`images`]: load, inline (via [`inline`]) and decode every image
//!    in the copy, one at a time; the only stage with network I/O
//! 3. [`breakpoints`]: top offsets of block-level elements, plus the total
//!    height as sentinel; measured once per export
//! 4. [`slicer`]: pure arithmetic turning breakpoints and page capacity
//!    into gapless page intervals

pub mod breakpoints;
pub mod images;
pub mod inline;
pub mod isolate;
pub mod slicer;
