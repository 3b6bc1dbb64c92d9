use super::{ExtractLimits, ExtractionError, TableText, TextExtractor};
use csv::ReaderBuilder;

/// CSV and TSV files.
///
/// The first row is read as column names; each later row becomes one line
/// pairing its cells with those names.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedExtractor {
    delimiter: u8,
}

impl DelimitedExtractor {
    pub const fn comma() -> Self {
        Self { delimiter: b',' }
    }

    pub const fn tab() -> Self {
        Self { delimiter: b'\t' }
    }
}

impl TextExtractor for DelimitedExtractor {
    fn format_name(&self) -> &'static str {
        if self.delimiter == b'\t' {
            "tsv"
        } else {
            "csv"
        }
    }

    fn extract(&self, data: &[u8], _limits: &ExtractLimits) -> Result<String, ExtractionError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut table = TableText::new();
        for record in reader.byte_records() {
            let record = record.map_err(|e| ExtractionError::Corrupt(e.to_string()))?;
            table.push_row(record.iter().map(String::from_utf8_lossy));
        }
        Ok(table.finish())
    }
}
