//! # pdf-sheets
//!
//! Build a PDF out of fixed-size pages, each carrying one or more raster
//! images placed in physical units. This is the artifact writer used by
//! `cv-export`: every page of the output is a captured bitmap slice of the
//! source document, so nothing here knows about text, fonts or layout.
//!
//! Coordinates follow the "sheet of paper" convention: millimetres, origin at
//! the top-left corner, `y` growing downwards. They are converted to PDF user
//! space (points, origin bottom-left) only when the document is serialised.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pdf_sheets::{ImageKind, Orientation, PageFormat, SheetDocument};
//!
//! # fn main() -> Result<(), pdf_sheets::SheetError> {
//! let png: Vec<u8> = std::fs::read("slice-1.png").unwrap();
//! let mut doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
//! doc.add_image(&png, ImageKind::Png, 0.0, 10.0, 210.0, 277.0)?;
//! doc.add_page();
//! doc.add_image(&png, ImageKind::Png, 0.0, 10.0, 210.0, 120.0)?;
//! doc.save("cv.pdf")?;
//! # Ok(())
//! # }
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ColorType, DynamicImage, ImageFormat};
use pdf_writer::{Content, Filter, Name, Pdf, Rect, Ref, TextStr};
use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Points per millimetre (1 pt = 1/72 in, 1 in = 25.4 mm).
pub const PT_PER_MM: f32 = 72.0 / 25.4;

/// Producer string written into the document information dictionary.
const PRODUCER: &str = concat!("pdf-sheets ", env!("CARGO_PKG_VERSION"));

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned while building or writing a sheet document.
#[derive(Error, Debug)]
pub enum SheetError {
    /// The image payload could not be decoded as the declared kind.
    #[error("Failed to decode {kind:?} image: {source}")]
    Decode {
        kind: ImageKind,
        #[source]
        source: image::ImageError,
    },

    /// Placement rectangle is degenerate (zero/negative/non-finite size).
    #[error("Invalid image placement: {0}")]
    InvalidPlacement(String),

    /// Writing the serialised PDF failed.
    #[error("Failed to write PDF '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Page geometry ────────────────────────────────────────────────────────────

/// Page orientation. Landscape swaps the format's width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

/// Physical page size in millimetres, given in portrait orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFormat {
    pub width_mm: f32,
    pub height_mm: f32,
}

impl PageFormat {
    /// ISO 216 A4, 210 × 297 mm.
    pub const A4: PageFormat = PageFormat {
        width_mm: 210.0,
        height_mm: 297.0,
    };

    /// ISO 216 A5, 148 × 210 mm.
    pub const A5: PageFormat = PageFormat {
        width_mm: 148.0,
        height_mm: 210.0,
    };

    /// US Letter, 8.5 × 11 in.
    pub const LETTER: PageFormat = PageFormat {
        width_mm: 215.9,
        height_mm: 279.4,
    };

    /// Width and height (mm) once `orientation` is applied.
    pub fn oriented(self, orientation: Orientation) -> (f32, f32) {
        match orientation {
            Orientation::Portrait => (self.width_mm, self.height_mm),
            Orientation::Landscape => (self.height_mm, self.width_mm),
        }
    }
}

impl Default for PageFormat {
    fn default() -> Self {
        Self::A4
    }
}

/// Encoding of an image payload handed to [`SheetDocument::add_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
}

impl ImageKind {
    fn format(self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
        }
    }
}

// ── Document ─────────────────────────────────────────────────────────────────

/// Pixel data ready to become an image XObject.
enum Encoded {
    /// JPEG bytes embedded unchanged.
    Dct { data: Vec<u8>, gray: bool },
    /// zlib-compressed RGB samples plus optional zlib-compressed alpha plane.
    Flate { rgb: Vec<u8>, alpha: Option<Vec<u8>> },
}

struct EmbeddedImage {
    width: u32,
    height: u32,
    encoded: Encoded,
}

/// Where an image is drawn on a page, in millimetres from the top-left
/// corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    image: usize,
    pub x_mm: f32,
    pub y_mm: f32,
    pub w_mm: f32,
    pub h_mm: f32,
}

/// An in-memory PDF made of same-sized pages carrying raster images.
///
/// A new document already contains one blank page; [`add_image`] draws on the
/// current (last) page and [`add_page`] starts a new one.
///
/// [`add_image`]: SheetDocument::add_image
/// [`add_page`]: SheetDocument::add_page
pub struct SheetDocument {
    width_mm: f32,
    height_mm: f32,
    images: Vec<EmbeddedImage>,
    pages: Vec<Vec<Placement>>,
}

impl SheetDocument {
    /// Create a document with a single blank page of the given format.
    pub fn new(orientation: Orientation, format: PageFormat) -> Self {
        let (width_mm, height_mm) = format.oriented(orientation);
        Self {
            width_mm,
            height_mm,
            images: Vec::new(),
            pages: vec![Vec::new()],
        }
    }

    /// Page width in millimetres.
    pub fn page_width_mm(&self) -> f32 {
        self.width_mm
    }

    /// Page height in millimetres.
    pub fn page_height_mm(&self) -> f32 {
        self.height_mm
    }

    /// Number of pages, including the initial one.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Images drawn on the 0-based `page`, in drawing order. Empty for a
    /// blank or out-of-range page.
    pub fn placements(&self, page: usize) -> &[Placement] {
        self.pages.get(page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a blank page and make it current.
    pub fn add_page(&mut self) {
        self.pages.push(Vec::new());
    }

    /// Decode `data` and draw it on the current page.
    ///
    /// `x`/`y` locate the image's top-left corner in millimetres from the
    /// page's top-left corner; `w`/`h` are the drawn size in millimetres.
    /// Images may extend past the page edge; the PDF viewer clips them.
    pub fn add_image(
        &mut self,
        data: &[u8],
        kind: ImageKind,
        x: f32,
        y: f32,
        w: f32,
        h: f32,
    ) -> Result<(), SheetError> {
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return Err(SheetError::InvalidPlacement(format!(
                "size must be positive, got {w}×{h} mm"
            )));
        }
        if !(x.is_finite() && y.is_finite()) {
            return Err(SheetError::InvalidPlacement(format!(
                "origin must be finite, got ({x}, {y})"
            )));
        }

        let image = embed(data, kind)?;
        self.images.push(image);
        let placement = Placement {
            image: self.images.len() - 1,
            x_mm: x,
            y_mm: y,
            w_mm: w,
            h_mm: h,
        };
        if let Some(page) = self.pages.last_mut() {
            page.push(placement);
        }
        Ok(())
    }

    /// Serialise the document into PDF bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pdf = Pdf::new();
        let mut next_id = 1i32;
        let mut alloc = || {
            let r = Ref::new(next_id);
            next_id += 1;
            r
        };

        let catalog_id = alloc();
        let pages_id = alloc();
        let info_id = alloc();

        // Image XObjects, shared by reference from the pages that draw them.
        let mut image_refs = Vec::with_capacity(self.images.len());
        for img in &self.images {
            let xobj_ref = alloc();
            match &img.encoded {
                Encoded::Dct { data, gray } => {
                    let mut xobj = pdf.image_xobject(xobj_ref, data);
                    xobj.filter(Filter::DctDecode);
                    xobj.width(img.width as i32);
                    xobj.height(img.height as i32);
                    if *gray {
                        xobj.color_space().device_gray();
                    } else {
                        xobj.color_space().device_rgb();
                    }
                    xobj.bits_per_component(8);
                }
                Encoded::Flate { rgb, alpha } => {
                    let smask_ref = alpha.as_ref().map(|alpha| {
                        let mask_ref = alloc();
                        let mut mask = pdf.image_xobject(mask_ref, alpha);
                        mask.filter(Filter::FlateDecode);
                        mask.width(img.width as i32);
                        mask.height(img.height as i32);
                        mask.color_space().device_gray();
                        mask.bits_per_component(8);
                        mask_ref
                    });

                    let mut xobj = pdf.image_xobject(xobj_ref, rgb);
                    xobj.filter(Filter::FlateDecode);
                    xobj.width(img.width as i32);
                    xobj.height(img.height as i32);
                    xobj.color_space().device_rgb();
                    xobj.bits_per_component(8);
                    if let Some(mask_ref) = smask_ref {
                        xobj.s_mask(mask_ref);
                    }
                }
            }
            image_refs.push(xobj_ref);
        }

        let page_w = self.width_mm * PT_PER_MM;
        let page_h = self.height_mm * PT_PER_MM;

        let mut page_ids = Vec::with_capacity(self.pages.len());
        for placements in &self.pages {
            let page_id = alloc();
            let content_id = alloc();
            page_ids.push(page_id);

            let mut content = Content::new();
            for p in placements {
                let w = p.w_mm * PT_PER_MM;
                let h = p.h_mm * PT_PER_MM;
                let x = p.x_mm * PT_PER_MM;
                let y_bottom = page_h - p.y_mm * PT_PER_MM - h;
                let name = xobject_name(p.image);
                content.save_state();
                content.transform([w, 0.0, 0.0, h, x, y_bottom]);
                content.x_object(Name(name.as_bytes()));
                content.restore_state();
            }
            let raw = content.finish();
            let compressed = miniz_oxide::deflate::compress_to_vec_zlib(raw.as_slice(), 6);
            pdf.stream(content_id, &compressed).filter(Filter::FlateDecode);

            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, page_w, page_h))
                .parent(pages_id)
                .contents(content_id);
            if !placements.is_empty() {
                let mut resources = page.resources();
                let mut xobjects = resources.x_objects();
                for p in placements {
                    let name = xobject_name(p.image);
                    xobjects.pair(Name(name.as_bytes()), image_refs[p.image]);
                }
            }
        }

        pdf.catalog(catalog_id).pages(pages_id);
        pdf.pages(pages_id)
            .kids(page_ids.iter().copied())
            .count(page_ids.len() as i32);
        pdf.document_info(info_id).producer(TextStr(PRODUCER));

        pdf.finish()
    }

    /// Serialise and write the document to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SheetError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_bytes()).map_err(|source| SheetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn xobject_name(index: usize) -> String {
    format!("Im{}", index + 1)
}

/// Decode an image payload into an embeddable form.
///
/// 8-bit RGB/gray JPEGs pass through untouched; everything else is decoded
/// and re-encoded as Flate RGB with a separate alpha plane when any pixel is
/// not fully opaque.
fn embed(data: &[u8], kind: ImageKind) -> Result<EmbeddedImage, SheetError> {
    let decoded: DynamicImage = image::load_from_memory_with_format(data, kind.format())
        .map_err(|source| SheetError::Decode { kind, source })?;
    let (width, height) = (decoded.width(), decoded.height());

    if kind == ImageKind::Jpeg {
        match decoded.color() {
            ColorType::Rgb8 | ColorType::L8 => {
                return Ok(EmbeddedImage {
                    width,
                    height,
                    encoded: Encoded::Dct {
                        data: data.to_vec(),
                        gray: decoded.color() == ColorType::L8,
                    },
                });
            }
            _ => {}
        }
    }

    let rgba = decoded.to_rgba8();
    let has_alpha = rgba.pixels().any(|p| p.0[3] < 255);
    let rgb_data: Vec<u8> = rgba
        .pixels()
        .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
        .collect();
    let rgb = miniz_oxide::deflate::compress_to_vec_zlib(&rgb_data, 6);
    let alpha = has_alpha.then(|| {
        let alpha_data: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
        miniz_oxide::deflate::compress_to_vec_zlib(&alpha_data, 6)
    });

    Ok(EmbeddedImage {
        width,
        height,
        encoded: Encoded::Flate { rgb, alpha },
    })
}

/// Encode an RGBA buffer as PNG. Convenience for callers holding raw pixels.
pub fn encode_png(img: &image::RgbaImage) -> Result<Vec<u8>, SheetError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|source| SheetError::Decode {
            kind: ImageKind::Png,
            source,
        })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(w: u32, h: u32, alpha: u8) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, alpha]))).unwrap()
    }

    fn count(haystack: &[u8], needle: &[u8]) -> usize {
        haystack.windows(needle.len()).filter(|w| *w == needle).count()
    }

    #[test]
    fn new_document_has_one_blank_page() {
        let doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
        assert_eq!(doc.page_count(), 1);
        let bytes = doc.to_bytes();
        assert!(bytes.starts_with(b"%PDF-"));
        assert_eq!(count(&bytes, b"/Count 1"), 1);
        assert_eq!(count(&bytes, b"/Subtype /Image"), 0);
    }

    #[test]
    fn landscape_swaps_dimensions() {
        let doc = SheetDocument::new(Orientation::Landscape, PageFormat::A4);
        assert_eq!(doc.page_width_mm(), 297.0);
        assert_eq!(doc.page_height_mm(), 210.0);
    }

    #[test]
    fn pages_and_images_are_counted() {
        let mut doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
        doc.add_image(&png(20, 10, 255), ImageKind::Png, 0.0, 10.0, 210.0, 105.0)
            .unwrap();
        doc.add_page();
        doc.add_image(&png(20, 5, 255), ImageKind::Png, 0.0, 10.0, 210.0, 52.5)
            .unwrap();
        doc.add_page();
        assert_eq!(doc.page_count(), 3);

        let second = doc.placements(1);
        assert_eq!(second.len(), 1);
        assert_eq!(
            (second[0].x_mm, second[0].y_mm, second[0].w_mm, second[0].h_mm),
            (0.0, 10.0, 210.0, 52.5)
        );
        assert!(doc.placements(2).is_empty());
        assert!(doc.placements(9).is_empty());

        let bytes = doc.to_bytes();
        assert_eq!(count(&bytes, b"/Count 3"), 1);
        assert_eq!(count(&bytes, b"/Subtype /Image"), 2);
        // Opaque images carry no soft mask.
        assert_eq!(count(&bytes, b"/SMask"), 0);
    }

    #[test]
    fn translucent_png_gets_soft_mask() {
        let mut doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
        doc.add_image(&png(4, 4, 128), ImageKind::Png, 0.0, 0.0, 10.0, 10.0)
            .unwrap();
        let bytes = doc.to_bytes();
        assert_eq!(count(&bytes, b"/SMask"), 1);
        assert_eq!(count(&bytes, b"/Subtype /Image"), 2);
    }

    #[test]
    fn rejects_degenerate_placement() {
        let mut doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
        let err = doc
            .add_image(&png(2, 2, 255), ImageKind::Png, 0.0, 0.0, 0.0, 10.0)
            .unwrap_err();
        assert!(matches!(err, SheetError::InvalidPlacement(_)));
    }

    #[test]
    fn rejects_garbage_payload() {
        let mut doc = SheetDocument::new(Orientation::Portrait, PageFormat::A4);
        let err = doc
            .add_image(b"not a png", ImageKind::Png, 0.0, 0.0, 10.0, 10.0)
            .unwrap_err();
        assert!(matches!(err, SheetError::Decode { kind: ImageKind::Png, .. }));
    }

    #[test]
    fn save_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        let doc = SheetDocument::new(Orientation::Portrait, PageFormat::LETTER);
        doc.save(&path).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF-"));
    }
}
