use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::IngestionError;

/// Broad file categories we handle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    PlainText,
    WordProcessor,
    PageDocument,
    Image,
    Unsupported,
}

impl FileCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::WordProcessor => "word_processor",
            Self::PageDocument => "page_document",
            Self::Image => "image",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDetection {
    pub mime_type: String,
    pub category: FileCategory,
    pub extension: String,
    pub file_size_bytes: u64,
}

/// Classify a file by extension, then confirm binary formats by magic bytes.
///
/// Zero-length, oversized, and files whose header contradicts their
/// extension are errors; unknown extensions are `Unsupported`.
pub fn detect_format(path: &Path, max_file_bytes: u64) -> Result<FormatDetection, IngestionError> {
    let metadata = std::fs::metadata(path)?;
    let file_size = metadata.len();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if file_size == 0 {
        return Err(IngestionError::EmptyFile);
    }
    if file_size > max_file_bytes {
        return Err(IngestionError::FileTooLarge {
            size: file_size,
            max: max_file_bytes,
        });
    }

    let (mime_type, category) = category_for_extension(&extension);

    if !category.is_supported() {
        return Ok(FormatDetection {
            mime_type: "application/octet-stream".into(),
            category: FileCategory::Unsupported,
            extension,
            file_size_bytes: file_size,
        });
    }

    // Read first 16 bytes for magic number detection
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 16];
    let bytes_read = file.read(&mut header)?;
    let header = &header[..bytes_read];

    let confirmed = match category {
        FileCategory::PageDocument => header.starts_with(b"%PDF"),
        // DOCX is a ZIP container: PK\x03\x04
        FileCategory::WordProcessor => header.starts_with(&[0x50, 0x4B, 0x03, 0x04]),
        FileCategory::Image => image_magic_matches(&extension, header),
        FileCategory::PlainText | FileCategory::Unsupported => true,
    };

    if !confirmed {
        return Err(IngestionError::CorruptFile {
            expected: category.as_str(),
        });
    }

    Ok(FormatDetection {
        mime_type: mime_type.to_string(),
        category,
        extension,
        file_size_bytes: file_size,
    })
}

fn category_for_extension(extension: &str) -> (&'static str, FileCategory) {
    match extension {
        "txt" | "text" | "md" => ("text/plain", FileCategory::PlainText),
        "docx" => (
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            FileCategory::WordProcessor,
        ),
        "pdf" => ("application/pdf", FileCategory::PageDocument),
        "png" => ("image/png", FileCategory::Image),
        "jpg" | "jpeg" => ("image/jpeg", FileCategory::Image),
        "tif" | "tiff" => ("image/tiff", FileCategory::Image),
        "bmp" => ("image/bmp", FileCategory::Image),
        _ => ("application/octet-stream", FileCategory::Unsupported),
    }
}

fn image_magic_matches(extension: &str, header: &[u8]) -> bool {
    match extension {
        // PNG: starts with 89 50 4E 47
        "png" => header.starts_with(&[0x89, 0x50, 0x4E, 0x47]),
        // JPEG: starts with FF D8 FF
        "jpg" | "jpeg" => header.starts_with(&[0xFF, 0xD8, 0xFF]),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        "tif" | "tiff" => {
            header.starts_with(&[0x49, 0x49, 0x2A, 0x00])
                || header.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
        }
        "bmp" => header.starts_with(b"BM"),
        _ => false,
    }
}
