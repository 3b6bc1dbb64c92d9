use super::ooxml::check_archive;
use super::{ExtractLimits, ExtractionError, TableText, TextExtractor};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::Timelike;
use std::io::Cursor;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Excel and OpenDocument workbooks.
///
/// Reads the cached value of every cell in every sheet. Formulas are not
/// evaluated and VBA projects are never opened. The first non-blank row of
/// each sheet labels the values below it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpreadsheetExtractor;

impl TextExtractor for SpreadsheetExtractor {
    fn format_name(&self) -> &'static str {
        "spreadsheet"
    }

    fn extract(&self, data: &[u8], limits: &ExtractLimits) -> Result<String, ExtractionError> {
        // calamine inflates members unbounded; measure them first
        if data.starts_with(ZIP_MAGIC) {
            check_archive(data, limits)?;
        }

        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data))
            .map_err(|e| ExtractionError::Corrupt(e.to_string()))?;

        let mut table = TableText::new();
        for sheet in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&sheet)
                .map_err(|e| ExtractionError::Corrupt(format!("sheet {}: {}", sheet, e)))?;
            table.next_table();
            for row in range.rows() {
                table.push_row(row.iter().map(cell_text));
            }
        }
        Ok(table.finish())
    }
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::DateTime(value) if value.is_datetime() => match value.as_datetime() {
            Some(at) if at.num_seconds_from_midnight() == 0 => at.format("%Y-%m-%d").to_string(),
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => value.to_string(),
        },
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixtures::zip_archive;

    const CONTENT_TYPES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/></Types>"#;

    const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Payroll" sheetId="1" r:id="rId1"/></sheets></workbook>"#;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;

    // Style 1 is built-in number format 14 (a date)
    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><cellXfs count="2"><xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"></xf><xf numFmtId="14" fontId="0" fillId="0" borderId="0" xfId="0" applyNumberFormat="1"></xf></cellXfs></styleSheet>"#;

    const SHEET: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Employee</t></is></c><c r="B1" t="inlineStr"><is><t>SSN</t></is></c><c r="C1" t="inlineStr"><is><t>DOB</t></is></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Jane</t></is></c><c r="B2" t="inlineStr"><is><t>123-45-6789</t></is></c><c r="C2" s="1"><v>31120</v></c></row><row r="3"><c r="A3"><f>1+1</f><v>2</v></c></row></sheetData></worksheet>"#;

    fn xlsx_with_sheet(sheet: &str) -> Vec<u8> {
        zip_archive(&[
            ("[Content_Types].xml", CONTENT_TYPES),
            ("_rels/.rels", ROOT_RELS),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/styles.xml", STYLES),
            ("xl/worksheets/sheet1.xml", sheet),
        ])
    }

    fn xlsx() -> Vec<u8> {
        xlsx_with_sheet(SHEET)
    }

    #[test]
    fn test_reads_cells_row_by_row() {
        let text = SpreadsheetExtractor
            .extract(&xlsx(), &ExtractLimits::default())
            .unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Employee SSN DOB");
        assert!(lines[1].starts_with("Employee: Jane; SSN: 123-45-6789"));
    }

    #[test]
    fn test_date_cell_rendered_as_date() {
        let text = SpreadsheetExtractor
            .extract(&xlsx(), &ExtractLimits::default())
            .unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.ends_with("DOB: 1985-03-14"), "{}", row);
        assert!(!row.contains("31120"));
    }

    #[test]
    fn test_oversized_sheet_member_rejected() {
        let cell = "7".repeat(20_000);
        let sheet = format!(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>{}</t></is></c></row></sheetData></worksheet>"#,
            cell
        );
        let data = xlsx_with_sheet(&sheet);
        assert!(data.len() < 8192);

        let err = SpreadsheetExtractor
            .extract(&data, &ExtractLimits::new(8192))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::TooLarge { limit: 8192, .. }));
    }

    #[test]
    fn test_formula_yields_cached_value() {
        let text = SpreadsheetExtractor
            .extract(&xlsx(), &ExtractLimits::default())
            .unwrap();
        assert!(!text.contains("1+1"));
        assert_eq!(text.lines().nth(2), Some("Employee: 2"));
    }

    #[test]
    fn test_not_a_workbook() {
        let err = SpreadsheetExtractor
            .extract(b"plain bytes", &ExtractLimits::default())
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Corrupt(_)));
    }
}
