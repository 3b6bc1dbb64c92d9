use super::{ExtractLimits, ExtractionError, TextExtractor};

/// Text-like files, read verbatim with invalid UTF-8 replaced
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn format_name(&self) -> &'static str {
        "text"
    }

    fn extract(&self, data: &[u8], _limits: &ExtractLimits) -> Result<String, ExtractionError> {
        Ok(String::from_utf8_lossy(data).into_owned())
    }
}
