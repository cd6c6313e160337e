use docx_rs::{read_docx, DocumentChild, Paragraph, ParagraphChild, RunChild};

use super::IngestionError;

/// Paragraph text of a word-processor document, in document order, joined with `\n`.
/// Empty paragraphs are dropped; tables and images are ignored.
pub fn paragraph_text(bytes: &[u8]) -> Result<String, IngestionError> {
    let docx = read_docx(bytes).map_err(|e| IngestionError::DocxParsing(format!("{e:?}")))?;

    let paragraphs: Vec<String> = docx
        .document
        .children
        .iter()
        .filter_map(|child| match child {
            DocumentChild::Paragraph(para) => Some(runs_text(para)),
            _ => None,
        })
        .filter(|text| !text.trim().is_empty())
        .collect();

    Ok(paragraphs.join("\n"))
}

/// Runs within a paragraph are fragments of the same line.
fn runs_text(para: &Paragraph) -> String {
    let mut text = String::new();
    for child in &para.children {
        if let ParagraphChild::Run(run) = child {
            for rc in &run.children {
                if let RunChild::Text(t) = rc {
                    text.push_str(&t.text);
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_docx(paragraphs: &[&str]) -> Vec<u8> {
        let mut docx = docx_rs::Docx::new();
        for p in paragraphs {
            docx = docx.add_paragraph(
                docx_rs::Paragraph::new().add_run(docx_rs::Run::new().add_text(*p)),
            );
        }
        let mut cursor = std::io::Cursor::new(Vec::new());
        docx.build().pack(&mut cursor).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn paragraphs_in_order() {
        let bytes = build_docx(&["IN THE HIGH COURT", "", "Ruling on the application"]);
        let text = paragraph_text(&bytes).unwrap();
        assert_eq!(text, "IN THE HIGH COURT\nRuling on the application");
    }

    #[test]
    fn garbage_bytes_are_parse_error() {
        let err = paragraph_text(b"PK\x03\x04 not really a zip").unwrap_err();
        assert!(matches!(err, IngestionError::DocxParsing(_)));
    }
}
