use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::IngestionError;

/// How text was obtained from a source file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PlainTextRead,
    DocxParagraphs,
    PdfDirect,
    PdfOcr,
    ImageOcr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainTextRead => "plain_text",
            Self::DocxParagraphs => "docx",
            Self::PdfDirect => "pdf_direct",
            Self::PdfOcr => "pdf_ocr",
            Self::ImageOcr => "image_ocr",
        }
    }

    pub fn used_ocr(&self) -> bool {
        matches!(self, Self::PdfOcr | Self::ImageOcr)
    }
}

/// Result of loading a single file. Never an error: failures land in
/// `diagnostic` with an empty `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub path: PathBuf,
    pub text: String,
    pub method: Option<ExtractionMethod>,
    pub page_count: usize,
    pub diagnostic: Option<String>,
}

impl LoadOutcome {
    pub fn failed(path: &Path, error: &IngestionError) -> Self {
        Self {
            path: path.to_path_buf(),
            text: String::new(),
            method: None,
            page_count: 0,
            diagnostic: Some(error.to_string()),
        }
    }

    /// Promote to a corpus document when the text is long enough.
    pub fn into_document(
        self,
        label: Option<String>,
        min_text_chars: usize,
    ) -> Result<Document, SkippedDocument> {
        let chars = self.text.trim().chars().count();
        let method = match self.method {
            Some(method) if chars >= min_text_chars => method,
            Some(_) => {
                let reason = IngestionError::TextTooShort {
                    chars,
                    min: min_text_chars,
                }
                .to_string();
                return Err(SkippedDocument {
                    path: self.path,
                    reason: append_diagnostic(reason, self.diagnostic),
                });
            }
            None => {
                return Err(SkippedDocument {
                    path: self.path,
                    reason: self
                        .diagnostic
                        .unwrap_or_else(|| "No text extracted".to_string()),
                });
            }
        };

        Ok(Document {
            path: self.path,
            text: self.text,
            method,
            page_count: self.page_count,
            normalized: None,
            label,
            diagnostic: self.diagnostic,
        })
    }
}

fn append_diagnostic(reason: String, diagnostic: Option<String>) -> String {
    match diagnostic {
        Some(d) => format!("{reason} ({d})"),
        None => reason,
    }
}

/// An ingested document. Identity is its source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: usize,
    /// Filled in by the normalizer.
    pub normalized: Option<String>,
    /// Present only when ground truth is available.
    pub label: Option<String>,
    /// Non-fatal notes, e.g. pages whose OCR failed.
    pub diagnostic: Option<String>,
}

impl Document {
    /// File name used as the join key for evaluation tables.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Normalized text if available, else the raw extracted text.
    pub fn feature_text(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.text)
    }
}

/// A document excluded from the corpus, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

/// Ordered documents plus the parallel skip report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Corpus {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedDocument>,
}

impl Corpus {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.documents.iter().map(Document::feature_text).collect()
    }
}

/// Embedded text layer of a page document.
pub trait PdfTextLayer {
    /// Text per page, in page order.
    fn page_texts(&self, pdf_bytes: &[u8]) -> Result<Vec<String>, IngestionError>;
}

/// Rasterizes pages of a page document for OCR.
pub trait PdfPageRenderer {
    fn page_count(&self, pdf_bytes: &[u8]) -> Result<usize, IngestionError>;

    /// Render one page (0-based) to PNG bytes.
    fn render_page(
        &self,
        pdf_bytes: &[u8],
        page_number: usize,
        dpi: u32,
    ) -> Result<Vec<u8>, IngestionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(text: &str, method: Option<ExtractionMethod>) -> LoadOutcome {
        LoadOutcome {
            path: PathBuf::from("/data/filing.txt"),
            text: text.into(),
            method,
            page_count: 1,
            diagnostic: None,
        }
    }

    #[test]
    fn long_text_becomes_document() {
        let doc = outcome(
            "This petition is filed before the honourable court today.",
            Some(ExtractionMethod::PlainTextRead),
        )
        .into_document(Some("petition".into()), 30)
        .unwrap();
        assert_eq!(doc.label.as_deref(), Some("petition"));
        assert_eq!(doc.file_name(), "filing.txt");
        assert!(doc.normalized.is_none());
    }

    #[test]
    fn short_text_is_skipped_with_reason() {
        let skipped = outcome("too short", Some(ExtractionMethod::PlainTextRead))
            .into_document(None, 30)
            .unwrap_err();
        assert!(skipped.reason.contains("too short"));
        assert!(skipped.reason.contains("minimum 30"));
    }

    #[test]
    fn failed_outcome_keeps_diagnostic() {
        let failed = LoadOutcome::failed(Path::new("/data/x.pdf"), &IngestionError::EmptyFile);
        let skipped = failed.into_document(None, 30).unwrap_err();
        assert_eq!(skipped.reason, "File is empty");
    }

    #[test]
    fn feature_text_prefers_normalized() {
        let mut doc = outcome(
            "The Contract between the parties is hereby executed.",
            Some(ExtractionMethod::PdfDirect),
        )
        .into_document(None, 10)
        .unwrap();
        assert!(doc.feature_text().starts_with("The Contract"));
        doc.normalized = Some("contract parties hereby executed".into());
        assert_eq!(doc.feature_text(), "contract parties hereby executed");
    }

    #[test]
    fn ocr_methods_flagged() {
        assert!(ExtractionMethod::PdfOcr.used_ocr());
        assert!(ExtractionMethod::ImageOcr.used_ocr());
        assert!(!ExtractionMethod::PdfDirect.used_ocr());
        assert_eq!(ExtractionMethod::DocxParagraphs.as_str(), "docx");
    }
}
