//! PDFium access for page documents: the embedded text layer, and page
//! rasterization for OCR when that layer is missing or too thin.
//!
//! The backend holds no PDFium handle. Every call binds the library and loads
//! the document afresh, which keeps the type `Send + Sync` for the batch pool.

use std::io::Cursor;
use std::path::PathBuf;

use image::ImageOutputFormat;
use pdfium_render::prelude::*;

use super::types::{PdfPageRenderer, PdfTextLayer};
use super::IngestionError;

/// Environment variable naming the PDFium shared library file.
pub const PDFIUM_LIB_ENV: &str = "PDFIUM_DYNAMIC_LIB_PATH";

/// Longest side of a rendered page, in pixels.
const MAX_RENDER_PX: u32 = 4096;
const POINTS_PER_INCH: f32 = 72.0;

pub struct PdfiumBackend;

impl PdfiumBackend {
    /// Fails when no PDFium library can be bound.
    pub fn new() -> Result<Self, IngestionError> {
        bind_pdfium()?;
        Ok(Self)
    }
}

/// Explicit library path, then next to the executable, then system paths.
fn bind_pdfium() -> Result<Pdfium, IngestionError> {
    let unavailable = |reason: String| IngestionError::PdfRendering { page: 0, reason };

    if let Ok(path) = std::env::var(PDFIUM_LIB_ENV) {
        return Pdfium::bind_to_library(&path)
            .map(Pdfium::new)
            .map_err(|e| unavailable(format!("cannot load PDFium from {path}: {e}")));
    }

    for dir in executable_dirs() {
        let candidate = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&candidate) {
            tracing::debug!(dir = %dir.display(), "PDFium bound next to executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| unavailable(format!("PDFium not found (set {PDFIUM_LIB_ENV}): {e}")))
}

fn executable_dirs() -> Vec<PathBuf> {
    let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    else {
        return Vec::new();
    };
    vec![dir.join("lib"), dir.join("..").join("lib"), dir]
}

fn with_document<T>(
    pdf_bytes: &[u8],
    f: impl FnOnce(&PdfDocument<'_>) -> Result<T, IngestionError>,
) -> Result<T, IngestionError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(pdf_bytes, None)
        .map_err(document_error)?;
    f(&document)
}

fn document_error(e: PdfiumError) -> IngestionError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        IngestionError::PdfEncrypted
    } else {
        IngestionError::PdfRendering {
            page: 0,
            reason: format!("cannot open document: {message}"),
        }
    }
}

/// Pixel size of a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RenderSize {
    width: u32,
    height: u32,
    /// The longest side was scaled down to `MAX_RENDER_PX`.
    capped: bool,
}

impl RenderSize {
    fn for_page(width_pt: f32, height_pt: f32, dpi: u32) -> Self {
        let scale = dpi as f32 / POINTS_PER_INCH;
        let w = (width_pt * scale).max(1.0);
        let h = (height_pt * scale).max(1.0);
        let longest = w.max(h);

        let (w, h, capped) = if longest > MAX_RENDER_PX as f32 {
            let shrink = MAX_RENDER_PX as f32 / longest;
            (w * shrink, h * shrink, true)
        } else {
            (w, h, false)
        };
        Self {
            width: (w as u32).clamp(1, MAX_RENDER_PX),
            height: (h as u32).clamp(1, MAX_RENDER_PX),
            capped,
        }
    }
}

impl PdfTextLayer for PdfiumBackend {
    fn page_texts(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, IngestionError> {
        with_document(pdf_bytes, |document| {
            Ok(document
                .pages()
                .iter()
                .enumerate()
                .map(|(index, page)| match page.text() {
                    Ok(text) => text.all(),
                    Err(e) => {
                        tracing::debug!(page = index, error = %e, "Page has no text layer");
                        String::new()
                    }
                })
                .collect())
        })
    }
}

impl PdfPageRenderer for PdfiumBackend {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, IngestionError> {
        with_document(pdf_bytes, |document| Ok(document.pages().len() as usize))
    }

    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, IngestionError> {
        let render_error = |reason: String| IngestionError::PdfRendering {
            page: page_number,
            reason,
        };

        with_document(pdf_bytes, |document| {
            let pages = document.pages();
            let page = u16::try_from(page_number)
                .ok()
                .and_then(|index| pages.get(index).ok())
                .ok_or_else(|| {
                    render_error(format!("page out of range ({} pages)", pages.len()))
                })?;

            let size = RenderSize::for_page(page.width().value, page.height().value, dpi);
            if size.capped {
                tracing::warn!(
                    page = page_number,
                    width = size.width,
                    height = size.height,
                    "Oversized page scaled down for OCR"
                );
            }

            let bitmap = page
                .render_with_config(
                    &PdfRenderConfig::new()
                        .set_target_width(size.width as i32)
                        .set_maximum_height(size.height as i32),
                )
                .map_err(|e| render_error(e.to_string()))?;

            let mut png = Cursor::new(Vec::new());
            bitmap
                .as_image()
                .write_to(&mut png, ImageOutputFormat::Png)
                .map_err(|e| IngestionError::ImageProcessing(format!("PNG encoding: {e}")))?;
            let png = png.into_inner();

            tracing::debug!(
                page = page_number,
                width = size.width,
                height = size.height,
                bytes = png.len(),
                "Page rendered"
            );
            Ok(png)
        })
    }
}

/// 1x1 RGB PNG, for tests that need real image bytes.
#[cfg(test)]
pub(crate) fn minimal_png() -> Vec<u8> {
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48,
        0x44, 0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00,
        0x00, 0x90, 0x77, 0x53, 0xDE, 0x00, 0x00, 0x00, 0x0C, 0x49, 0x44, 0x41, 0x54, 0x08,
        0xD7, 0x63, 0xF8, 0xCF, 0xC0, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0xE2, 0x21, 0xBC,
        0x33, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letter_page_at_default_dpi() {
        // 8.5 x 11 in at 200 dpi.
        let size = RenderSize::for_page(612.0, 792.0, 200);
        assert!(size.width.abs_diff(1700) <= 1, "width {}", size.width);
        assert!(size.height.abs_diff(2200) <= 1, "height {}", size.height);
        assert!(!size.capped);
    }

    #[test]
    fn oversized_page_is_capped_keeping_aspect() {
        let size = RenderSize::for_page(3000.0, 6000.0, 300);
        assert!(size.capped);
        assert!(size.height <= MAX_RENDER_PX && size.height.abs_diff(MAX_RENDER_PX) <= 1);
        assert!(size.width.abs_diff(MAX_RENDER_PX / 2) <= 1);
    }

    #[test]
    fn degenerate_page_still_renders_one_pixel() {
        let size = RenderSize::for_page(0.0, 0.0, 200);
        assert_eq!((size.width, size.height), (1, 1));
    }

    #[test]
    fn test_png_has_signature() {
        assert_eq!(&minimal_png()[1..4], b"PNG");
    }
}
