//! Text extraction from uploaded files.
//!
//! Each supported format has an adapter implementing [`TextExtractor`]. The
//! format is resolved from the file name's extension, falling back to the
//! declared MIME type. Adapters only read literal stored text: spreadsheet
//! formulas are never evaluated and embedded macros are never touched.

mod delimited;
mod ooxml;
mod pdf;
mod plain;
mod spreadsheet;

pub use delimited::DelimitedExtractor;
pub use ooxml::{SlideDeckExtractor, WordDocumentExtractor};
pub use pdf::PdfExtractor;
pub use plain::PlainTextExtractor;
pub use spreadsheet::SpreadsheetExtractor;

use crate::request::UploadedFile;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, warn};

/// Default per-file size ceiling (50 MB)
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024 * 1024;

/// Why a file produced no text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("corrupt content: {0}")]
    Corrupt(String),
}

/// Bounds applied while extracting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Ceiling on the raw file size and on any decompressed archive member
    pub max_bytes: usize,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl ExtractLimits {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

/// Turns the bytes of one file format into plain text
pub trait TextExtractor: Send + Sync {
    /// Short name used in logs
    fn format_name(&self) -> &'static str;

    fn extract(&self, data: &[u8], limits: &ExtractLimits) -> Result<String, ExtractionError>;
}

/// File formats with an extraction adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Spreadsheet,
    Csv,
    Tsv,
    Pdf,
    WordDocument,
    SlideDeck,
    PlainText,
    /// No adapter; the file is skipped
    Unsupported,
}

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "json", "xml", "yaml", "yml", "log", "py", "js", "ts", "html", "css", "sql",
    "sh", "bat", "ini", "cfg", "conf", "env", "properties",
];

impl Format {
    /// Format for a lower-cased extension, without the dot
    pub fn from_extension(ext: &str) -> Format {
        match ext {
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Format::Spreadsheet,
            "csv" => Format::Csv,
            "tsv" => Format::Tsv,
            "pdf" => Format::Pdf,
            "docx" => Format::WordDocument,
            "pptx" => Format::SlideDeck,
            ext if PLAIN_TEXT_EXTENSIONS.contains(&ext) => Format::PlainText,
            _ => Format::Unsupported,
        }
    }

    /// Format for a declared MIME type (parameters ignored)
    pub fn from_content_type(content_type: &str) -> Format {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel.sheet.macroenabled.12"
            | "application/vnd.ms-excel.sheet.binary.macroenabled.12"
            | "application/vnd.ms-excel"
            | "application/vnd.oasis.opendocument.spreadsheet" => Format::Spreadsheet,
            "text/csv" => Format::Csv,
            "text/tab-separated-values" => Format::Tsv,
            "application/pdf" => Format::Pdf,
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Format::WordDocument
            }
            "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
                Format::SlideDeck
            }
            "application/json" | "application/xml" | "application/x-yaml"
            | "application/yaml" | "application/sql" | "application/javascript" => {
                Format::PlainText
            }
            other if other.starts_with("text/") => Format::PlainText,
            _ => Format::Unsupported,
        }
    }

    /// Resolve from the file name, then from the declared MIME type
    pub fn resolve(name: &str, content_type: Option<&str>) -> Format {
        let by_extension = extension(name)
            .map(|ext| Format::from_extension(&ext))
            .unwrap_or(Format::Unsupported);
        if by_extension != Format::Unsupported {
            return by_extension;
        }
        content_type
            .map(Format::from_content_type)
            .unwrap_or(Format::Unsupported)
    }

    fn adapter(self) -> Option<&'static dyn TextExtractor> {
        static SPREADSHEET: SpreadsheetExtractor = SpreadsheetExtractor;
        static CSV: DelimitedExtractor = DelimitedExtractor::comma();
        static TSV: DelimitedExtractor = DelimitedExtractor::tab();
        static PDF: PdfExtractor = PdfExtractor;
        static DOCX: WordDocumentExtractor = WordDocumentExtractor;
        static PPTX: SlideDeckExtractor = SlideDeckExtractor;
        static PLAIN: PlainTextExtractor = PlainTextExtractor;

        match self {
            Format::Spreadsheet => Some(&SPREADSHEET),
            Format::Csv => Some(&CSV),
            Format::Tsv => Some(&TSV),
            Format::Pdf => Some(&PDF),
            Format::WordDocument => Some(&DOCX),
            Format::SlideDeck => Some(&PPTX),
            Format::PlainText => Some(&PLAIN),
            Format::Unsupported => None,
        }
    }
}

/// Lower-cased extension of `name`, if it has one.
///
/// A dotfile's name after the dot counts as its extension (`.env` is `env`).
pub fn extension(name: &str) -> Option<String> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let (_, ext) = base.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Extract the text of an uploaded file
pub fn extract(file: &UploadedFile, limits: &ExtractLimits) -> Result<String, ExtractionError> {
    if file.data.len() > limits.max_bytes {
        return Err(ExtractionError::TooLarge {
            size: file.data.len(),
            limit: limits.max_bytes,
        });
    }

    let format = Format::resolve(&file.name, file.content_type.as_deref());
    let Some(adapter) = format.adapter() else {
        let label = extension(&file.name)
            .map(|ext| format!(".{}", ext))
            .or_else(|| file.content_type.clone())
            .unwrap_or_else(|| "no extension".to_string());
        return Err(ExtractionError::Unsupported(label));
    };

    debug!(
        file = %file.name,
        format = adapter.format_name(),
        bytes = file.data.len(),
        "Extracting text"
    );

    match panic::catch_unwind(AssertUnwindSafe(|| adapter.extract(&file.data, limits))) {
        Ok(result) => result,
        Err(_) => {
            warn!(file = %file.name, format = adapter.format_name(), "Extractor panicked");
            Err(ExtractionError::Corrupt(format!(
                "{} parser failed",
                adapter.format_name()
            )))
        }
    }
}

/// Text of a table whose first non-blank row names the columns.
///
/// The header row is emitted as is. Every later row becomes one line of
/// `column: value` pairs, so a label that only appears in the header stays
/// next to each value under it. Empty cells and blank rows are skipped.
#[derive(Debug, Default)]
pub(crate) struct TableText {
    header: Option<Vec<String>>,
    lines: Vec<String>,
}

impl TableText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cells: Vec<String> = cells
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .collect();
        if cells.iter().all(String::is_empty) {
            return;
        }

        let line = match &self.header {
            None => cells
                .iter()
                .filter(|c| !c.is_empty())
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            Some(header) => cells
                .iter()
                .enumerate()
                .filter(|(_, c)| !c.is_empty())
                .map(|(i, cell)| match header.get(i).filter(|h| !h.is_empty()) {
                    Some(column) => format!("{}: {}", column, cell),
                    None => cell.clone(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        };
        self.lines.push(line);

        if self.header.is_none() {
            self.header = Some(cells);
        }
    }

    /// Start a new table; the next non-blank row is its header
    pub fn next_table(&mut self) {
        self.header = None;
    }

    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}
