//! Upstream text extraction: uploaded bytes to normalized text plus page spans.
//!
//! Extraction failures are reported to the caller; a document whose bytes do not
//! extract is never stored.

use docqa_core::error::AppError;
use docqa_core::normalize::{char_len, normalize_text};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageSpan {
    /// 1-based.
    pub page_number: u32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Vec<PageSpan>,
}

impl ExtractedText {
    /// Text with no layout metadata.
    pub fn plain(text: &str) -> Self {
        Self {
            text: normalize_text(text),
            pages: Vec::new(),
        }
    }
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, AppError>;
}

const PAGE_SEPARATOR: char = '\u{c}';
const PAGE_JOIN: &str = "\n\n";

/// Normalize each page and join the non-empty ones with a blank line.
/// Empty pages keep their number but get no span.
pub fn assemble_pages<'a, I>(pages: I) -> Result<ExtractedText, AppError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut text = String::new();
    let mut spans = Vec::new();
    let mut offset = 0usize;

    for (i, raw) in pages.into_iter().enumerate() {
        let page = normalize_text(raw);
        let page = page.trim_start_matches('\n');
        if page.trim().is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str(PAGE_JOIN);
            offset += PAGE_JOIN.len();
        }
        let len = char_len(page);
        spans.push(PageSpan {
            page_number: (i + 1) as u32,
            start: offset,
            end: offset + len,
        });
        text.push_str(page);
        offset += len;
    }

    if text.trim().is_empty() {
        return Err(AppError::new(
            "RAG_EXTRACTION_EMPTY",
            "Document contains no extractable text",
        ));
    }
    Ok(ExtractedText { text, pages: spans })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, AppError> {
        let raw = std::str::from_utf8(bytes).map_err(|e| {
            AppError::new("RAG_EXTRACTION_ENCODING", "Text document is not valid UTF-8")
                .with_details(format!("valid_up_to={}", e.valid_up_to()))
        })?;
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        assemble_pages(raw.split(PAGE_SEPARATOR))
    }
}

#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

#[cfg(feature = "pdf")]
impl TextExtractor for PdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, AppError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(AppError::new(
                "RAG_EXTRACTION_FAILED",
                "File does not look like a PDF document",
            ));
        }
        let raw = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
            AppError::new("RAG_EXTRACTION_FAILED", "Failed to extract text from PDF")
                .with_details(e.to_string())
        })?;
        assemble_pages(raw.split(PAGE_SEPARATOR))
    }
}

/// Route an upload by its declared content type (parameters such as `charset` are ignored).
pub fn extractor_for_content_type(content_type: &str) -> Result<Box<dyn TextExtractor>, AppError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match essence.as_str() {
        "text/plain" => Ok(Box::new(PlainTextExtractor)),
        #[cfg(feature = "pdf")]
        "application/pdf" | "application/x-pdf" => Ok(Box::new(PdfExtractor)),
        _ => Err(AppError::new(
            "RAG_EXTRACTION_UNSUPPORTED",
            "Unsupported document content type",
        )
        .with_details(format!("content_type={content_type}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::normalize::char_slice;
    use pretty_assertions::assert_eq;

    #[test]
    fn form_feeds_become_page_spans() {
        let out = PlainTextExtractor
            .extract("First page.\r\n\u{c}\u{c}Third page.  \n".as_bytes())
            .expect("extract");
        assert_eq!(out.text, "First page.\n\nThird page.");
        assert_eq!(
            out.pages,
            vec![
                PageSpan { page_number: 1, start: 0, end: 11 },
                PageSpan { page_number: 3, start: 13, end: 24 },
            ]
        );
        assert_eq!(char_slice(&out.text, 13, 24), "Third page.");
    }

    #[test]
    fn page_offsets_count_chars_not_bytes() {
        let out = assemble_pages(["Grüße", "Ähm"]).expect("assemble");
        assert_eq!(out.pages[1].start, 7);
        assert_eq!(char_slice(&out.text, out.pages[1].start, out.pages[1].end), "Ähm");
    }

    #[test]
    fn rejects_empty_and_invalid_input() {
        let err = PlainTextExtractor.extract(b"  \n\t\n").expect_err("empty");
        assert_eq!(err.code, "RAG_EXTRACTION_EMPTY");

        let err = PlainTextExtractor.extract(&[0xff, 0xfe, 0x41]).expect_err("bad utf8");
        assert_eq!(err.code, "RAG_EXTRACTION_ENCODING");
    }

    #[test]
    fn routes_by_content_type() {
        assert!(extractor_for_content_type("text/plain; charset=utf-8").is_ok());
        let err = extractor_for_content_type("image/png").err().expect("unsupported");
        assert_eq!(err.code, "RAG_EXTRACTION_UNSUPPORTED");
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn pdf_extractor_rejects_non_pdf_bytes() {
        let ex = extractor_for_content_type("application/pdf").expect("pdf routed");
        let err = ex.extract(b"plain text").expect_err("not a pdf");
        assert_eq!(err.code, "RAG_EXTRACTION_FAILED");
    }
}
