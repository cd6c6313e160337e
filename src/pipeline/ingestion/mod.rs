pub mod types;
pub mod format;
pub mod sanitize;
pub mod pdf;
pub mod docx;
pub mod ocr;
pub mod loader;
pub mod batch;

pub use types::*;
pub use format::*;
pub use sanitize::*;
pub use loader::*;
pub use batch::*;

use thiserror::Error;

use crate::pipeline::service::ExternalServiceError;

/// Marker inserted between the texts of consecutive pages.
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File is empty")]
    EmptyFile,

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("File is {size} bytes, limit is {max}")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File content does not match its {expected} extension")]
    CorruptFile { expected: &'static str },

    #[error("Word-processor document could not be read: {0}")]
    DocxParsing(String),

    #[error("PDF is encrypted or password-protected")]
    PdfEncrypted,

    #[error("PDF page {page} failed: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Document requires OCR but no OCR service is configured")]
    OcrUnavailable,

    #[error("OCR failed: {0}")]
    Ocr(#[from] ExternalServiceError),

    #[error("Extracted text too short ({chars} chars, minimum {min})")]
    TextTooShort { chars: usize, min: usize },

    #[error("Document timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Loader thread terminated unexpectedly")]
    WorkerLost,

    #[error("{abandoned} timed-out loaders still running, document not started")]
    LoaderBacklog { abandoned: usize },
}
