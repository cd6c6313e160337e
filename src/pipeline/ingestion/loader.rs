use std::path::Path;
use std::sync::Arc;

use super::docx::paragraph_text;
use super::format::{detect_format, FileCategory};
use super::ocr::{OcrEngine, OcrRequest};
use super::pdf::PdfiumBackend;
use super::sanitize::{decode_text, sanitize_extracted_text};
use super::types::{ExtractionMethod, LoadOutcome, PdfPageRenderer, PdfTextLayer};
use super::{IngestionError, PAGE_BREAK};
use crate::pipeline::service::Services;
use crate::pipeline_config::IngestionConfig;

/// Thresholds the loader needs from configuration.
#[derive(Debug, Clone, Copy)]
pub struct LoaderSettings {
    pub min_text_chars: usize,
    pub render_dpi: u32,
    pub max_file_bytes: u64,
}

impl From<&IngestionConfig> for LoaderSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            min_text_chars: config.min_text_chars,
            render_dpi: config.render_dpi,
            max_file_bytes: config.max_file_bytes,
        }
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::from(&IngestionConfig::default())
    }
}

/// Stand-in text layer when PDFium cannot be bound.
struct UnavailablePdfBackend(String);

impl PdfTextLayer for UnavailablePdfBackend {
    fn page_texts(&self, _pdf_bytes: &[u8]) -> Result<Vec<String>, IngestionError> {
        Err(IngestionError::PdfRendering {
            page: 0,
            reason: self.0.clone(),
        })
    }
}

struct Extracted {
    text: String,
    method: ExtractionMethod,
    page_count: usize,
    notes: Vec<String>,
}

/// Turns one file into text.
/// Uses trait objects for OCR and PDF access, enabling dependency injection.
pub struct DocumentLoader {
    ocr_engine: Option<Arc<dyn OcrEngine>>,
    pdf_text: Box<dyn PdfTextLayer + Send + Sync>,
    pdf_renderer: Option<Box<dyn PdfPageRenderer + Send + Sync>>,
    settings: LoaderSettings,
}

impl DocumentLoader {
    pub fn new(pdf_text: Box<dyn PdfTextLayer + Send + Sync>, settings: LoaderSettings) -> Self {
        Self {
            ocr_engine: None,
            pdf_text,
            pdf_renderer: None,
            settings,
        }
    }

    /// PDFium-backed loader wired to the configured OCR collaborator.
    /// Without a loadable PDFium, page documents fail with a diagnostic.
    pub fn from_config(config: &IngestionConfig, services: &Services) -> Self {
        let settings = LoaderSettings::from(config);
        let mut loader = match PdfiumBackend::new() {
            Ok(_) => Self::new(Box::new(PdfiumBackend), settings)
                .with_pdf_renderer(Box::new(PdfiumBackend)),
            Err(e) => {
                tracing::warn!(error = %e, "PDFium unavailable, page documents will be skipped");
                Self::new(Box::new(UnavailablePdfBackend(e.to_string())), settings)
            }
        };
        if let Some(engine) = &services.ocr {
            loader = loader.with_ocr(Arc::clone(engine));
        }
        loader
    }

    /// OCR collaborator for images and text-less page documents.
    pub fn with_ocr(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr_engine = Some(engine);
        self
    }

    /// Add a page renderer for per-page OCR of scanned page documents.
    pub fn with_pdf_renderer(mut self, renderer: Box<dyn PdfPageRenderer + Send + Sync>) -> Self {
        self.pdf_renderer = Some(renderer);
        self
    }

    pub fn settings(&self) -> LoaderSettings {
        self.settings
    }

    /// Load a file. Failures become an empty outcome with a diagnostic.
    pub fn load(&self, path: &Path) -> LoadOutcome {
        match self.try_load(path) {
            Ok(extracted) => {
                tracing::debug!(
                    path = %path.display(),
                    method = extracted.method.as_str(),
                    pages = extracted.page_count,
                    text_length = extracted.text.len(),
                    "Document loaded"
                );
                LoadOutcome {
                    path: path.to_path_buf(),
                    text: extracted.text,
                    method: Some(extracted.method),
                    page_count: extracted.page_count,
                    diagnostic: (!extracted.notes.is_empty()).then(|| extracted.notes.join("; ")),
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Document could not be loaded");
                LoadOutcome::failed(path, &e)
            }
        }
    }

    fn try_load(&self, path: &Path) -> Result<Extracted, IngestionError> {
        let format = detect_format(path, self.settings.max_file_bytes)?;
        if !format.category.is_supported() {
            return Err(IngestionError::UnsupportedFormat(if format.extension.is_empty() {
                "no extension".to_string()
            } else {
                format.extension.clone()
            }));
        }

        let bytes = std::fs::read(path)?;

        let mut extracted = match format.category {
            FileCategory::PlainText => Extracted {
                text: decode_text(&bytes),
                method: ExtractionMethod::PlainTextRead,
                page_count: 1,
                notes: vec![],
            },
            FileCategory::WordProcessor => Extracted {
                text: paragraph_text(&bytes)?,
                method: ExtractionMethod::DocxParagraphs,
                page_count: 1,
                notes: vec![],
            },
            FileCategory::PageDocument => self.load_page_document(path, &bytes)?,
            FileCategory::Image => {
                let engine = self.ocr_engine.as_ref().ok_or(IngestionError::OcrUnavailable)?;
                let text = engine
                    .recognize(&OcrRequest {
                        source: path,
                        page: None,
                        mime_type: &format.mime_type,
                        bytes: &bytes,
                    })
                    .into_text()?;
                Extracted {
                    text,
                    method: ExtractionMethod::ImageOcr,
                    page_count: 1,
                    notes: vec![],
                }
            }
            FileCategory::Unsupported => {
                return Err(IngestionError::UnsupportedFormat(format.extension));
            }
        };

        extracted.text = sanitize_extracted_text(&extracted.text);
        Ok(extracted)
    }

    /// Direct text layer first; OCR page by page when it is too thin.
    fn load_page_document(&self, path: &Path, bytes: &[u8]) -> Result<Extracted, IngestionError> {
        let direct_pages = self.pdf_text.page_texts(bytes)?;
        let direct = join_pages(direct_pages.iter().map(String::as_str));

        if direct.trim().chars().count() >= self.settings.min_text_chars {
            return Ok(Extracted {
                text: direct,
                method: ExtractionMethod::PdfDirect,
                page_count: direct_pages.len(),
                notes: vec![],
            });
        }

        let engine = self.ocr_engine.as_ref().ok_or(IngestionError::OcrUnavailable)?;

        let Some(renderer) = self.pdf_renderer.as_ref() else {
            // Without a renderer the whole file goes to the collaborator at once.
            tracing::warn!(path = %path.display(), "No page renderer available, OCR on raw PDF bytes");
            let text = engine
                .recognize(&OcrRequest {
                    source: path,
                    page: None,
                    mime_type: "application/pdf",
                    bytes,
                })
                .into_text()?;
            return Ok(Extracted {
                text,
                method: ExtractionMethod::PdfOcr,
                page_count: direct_pages.len().max(1),
                notes: vec![],
            });
        };

        let page_count = renderer.page_count(bytes)?;
        let mut page_texts = Vec::with_capacity(page_count);
        let mut notes = Vec::new();

        for page in 0..page_count {
            let result = renderer
                .render_page(bytes, page, self.settings.render_dpi)
                .and_then(|png| {
                    engine
                        .recognize(&OcrRequest {
                            source: path,
                            page: Some(page),
                            mime_type: "image/png",
                            bytes: &png,
                        })
                        .into_text()
                        .map_err(IngestionError::from)
                });

            match result {
                Ok(text) => page_texts.push(text),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        page = page + 1,
                        error = %e,
                        "Page OCR failed, continuing with remaining pages"
                    );
                    notes.push(format!("page {}: {e}", page + 1));
                    page_texts.push(String::new());
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            pages = page_count,
            failed_pages = notes.len(),
            "Scanned page document OCR complete"
        );

        Ok(Extracted {
            text: join_pages(page_texts.iter().map(String::as_str)),
            method: ExtractionMethod::PdfOcr,
            page_count,
            notes,
        })
    }
}

/// Join page texts with the page-boundary marker, skipping empty pages.
fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    pages
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK)
}
