use super::{ExtractLimits, ExtractionError, TextExtractor};
use lopdf::Document;

/// PDF documents, text per page with pages joined by newlines
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn format_name(&self) -> &'static str {
        "pdf"
    }

    fn extract(&self, data: &[u8], _limits: &ExtractLimits) -> Result<String, ExtractionError> {
        let document =
            Document::load_mem(data).map_err(|e| ExtractionError::Corrupt(e.to_string()))?;

        let mut pages = Vec::new();
        for page_number in document.get_pages().keys() {
            let text = document
                .extract_text(&[*page_number])
                .map_err(|e| ExtractionError::Corrupt(format!("page {}: {}", page_number, e)))?;
            if !text.trim().is_empty() {
                pages.push(text.trim_end().to_string());
            }
        }
        Ok(pages.join("\n"))
    }
}
