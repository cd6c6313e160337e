/// Sanitize extracted text before passing downstream.
/// Strips control and invisible characters, trims lines, drops blank lines.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            (!c.is_control() || *c == '\n' || *c == '\t')
                && !matches!(
                    c,
                    '\u{FFFD}' // replacement character from lossy decodes
                        | '\u{200B}' // zero-width space
                        | '\u{200C}'
                        | '\u{200D}'
                        | '\u{FEFF}' // byte order mark
                )
        })
        .collect::<String>()
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode plain-text bytes: UTF-8 when valid, lossy otherwise.
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            tracing::debug!(
                valid_up_to = e.valid_up_to(),
                "Text is not valid UTF-8, decoding lossily"
            );
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_null_bytes() {
        let raw = "Plaintiff: Jane\x00Roe";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "Plaintiff: JaneRoe");
    }

    #[test]
    fn strips_control_characters() {
        let raw = "Case No. 2021/445\x01\x02\x03\nFiled: 2021-03-15";
        let clean = sanitize_extracted_text(raw);
        assert!(!clean.contains('\x01'));
        assert!(clean.contains("2021/445"));
        assert!(clean.contains("2021-03-15"));
    }

    #[test]
    fn preserves_legal_punctuation() {
        let raw = "§ 12(b)(6) \u{201C}motion\u{201D}; see id. at 4\u{2013}5";
        assert_eq!(sanitize_extracted_text(raw), raw);
    }

    #[test]
    fn collapses_blank_lines() {
        let raw = "Line one\n\n\n\nLine two\r\n\r\nLine three";
        let clean = sanitize_extracted_text(raw);
        assert_eq!(clean, "Line one\nLine two\nLine three");
    }

    #[test]
    fn trims_whitespace_per_line() {
        let raw = "  leading spaces  \n  trailing too  ";
        assert_eq!(sanitize_extracted_text(raw), "leading spaces\ntrailing too");
    }

    #[test]
    fn drops_invisible_characters() {
        let raw = "\u{FEFF}Affi\u{200B}davit\u{FFFD}";
        assert_eq!(sanitize_extracted_text(raw), "Affidavit");
    }

    #[test]
    fn empty_input_returns_empty() {
        assert_eq!(sanitize_extracted_text(""), "");
        assert_eq!(sanitize_extracted_text("\x00\x01\x02"), "");
    }

    #[test]
    fn page_break_marker_survives() {
        let raw = format!("first page{}second page", crate::pipeline::ingestion::PAGE_BREAK);
        assert_eq!(
            sanitize_extracted_text(&raw),
            "first page\n--- Page Break ---\nsecond page"
        );
    }

    #[test]
    fn decode_valid_utf8() {
        assert_eq!(decode_text("Résumé".as_bytes()), "Résumé");
    }

    #[test]
    fn decode_invalid_utf8_is_lossy() {
        let bytes = [b'c', b'a', b'f', 0xE9, b' ', b'o', b'k'];
        let text = decode_text(&bytes);
        assert!(text.starts_with("caf"));
        assert!(text.ends_with(" ok"));
    }
}
