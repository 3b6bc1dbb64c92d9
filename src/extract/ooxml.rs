//! Word documents and PowerPoint decks (Office Open XML containers).
//!
//! Both are zip archives of XML parts. Text lives in run elements (`w:t`,
//! `a:t`) grouped into paragraphs (`w:p`, `a:p`); each paragraph becomes one
//! line. The extraction size limit bounds every member read and the total
//! decompressed size of each archive.

use super::{ExtractLimits, ExtractionError, TextExtractor};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::{self, Cursor, Read};
use zip::result::ZipError;
use zip::ZipArchive;

type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

struct Markup {
    paragraph: &'static [u8],
    text: &'static [u8],
    breaks: &'static [&'static [u8]],
}

const WORDPROCESSING: Markup = Markup {
    paragraph: b"w:p",
    text: b"w:t",
    breaks: &[b"w:tab", b"w:br", b"w:cr"],
};

const DRAWING: Markup = Markup {
    paragraph: b"a:p",
    text: b"a:t",
    breaks: &[b"a:br"],
};

/// `.docx`: main body plus headers and footers
#[derive(Debug, Clone, Copy, Default)]
pub struct WordDocumentExtractor;

impl TextExtractor for WordDocumentExtractor {
    fn format_name(&self) -> &'static str {
        "docx"
    }

    fn extract(&self, data: &[u8], limits: &ExtractLimits) -> Result<String, ExtractionError> {
        let mut archive = open(data)?;
        let names = member_names(&archive);
        let mut budget = Budget::new(limits.max_bytes);

        let mut parts = numbered_members(&names, "word/header", ".xml");
        parts.push("word/document.xml".to_string());
        parts.extend(numbered_members(&names, "word/footer", ".xml"));

        let mut lines = Vec::new();
        for part in &parts {
            match read_member(&mut archive, part, &mut budget)? {
                Some(xml) => collect_paragraphs(&xml, &WORDPROCESSING, &mut lines)?,
                None if part == "word/document.xml" => {
                    return Err(ExtractionError::Corrupt(
                        "missing word/document.xml".to_string(),
                    ))
                }
                None => {}
            }
        }
        Ok(lines.join("\n"))
    }
}

/// `.pptx`: text of every slide, in slide-number order
#[derive(Debug, Clone, Copy, Default)]
pub struct SlideDeckExtractor;

impl TextExtractor for SlideDeckExtractor {
    fn format_name(&self) -> &'static str {
        "pptx"
    }

    fn extract(&self, data: &[u8], limits: &ExtractLimits) -> Result<String, ExtractionError> {
        let mut archive = open(data)?;
        let names = member_names(&archive);
        let mut budget = Budget::new(limits.max_bytes);

        let mut lines = Vec::new();
        for slide in numbered_members(&names, "ppt/slides/slide", ".xml") {
            if let Some(xml) = read_member(&mut archive, &slide, &mut budget)? {
                collect_paragraphs(&xml, &DRAWING, &mut lines)?;
            }
        }
        Ok(lines.join("\n"))
    }
}

fn open(data: &[u8]) -> Result<Archive<'_>, ExtractionError> {
    ZipArchive::new(Cursor::new(data)).map_err(|e| ExtractionError::Corrupt(e.to_string()))
}

fn member_names(archive: &Archive<'_>) -> Vec<String> {
    archive.file_names().map(str::to_string).collect()
}

/// Members named `{prefix}{n}{suffix}`, ordered by `n`
fn numbered_members(names: &[String], prefix: &str, suffix: &str) -> Vec<String> {
    let mut numbered: Vec<(u32, &String)> = names
        .iter()
        .filter_map(|name| {
            let n = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
            Some((n.parse().ok()?, name))
        })
        .collect();
    numbered.sort();
    numbered.into_iter().map(|(_, name)| name.clone()).collect()
}

/// Decompressed bytes one archive may still yield
struct Budget {
    limit: usize,
    used: usize,
}

impl Budget {
    fn new(limit: usize) -> Self {
        Self { limit, used: 0 }
    }

    fn remaining(&self) -> usize {
        self.limit - self.used
    }

    fn too_large(&self, extra: usize) -> ExtractionError {
        ExtractionError::TooLarge {
            size: self.used.saturating_add(extra),
            limit: self.limit,
        }
    }

    /// Reject a member whose declared size alone would exceed the budget
    fn check_declared(&self, declared: u64) -> Result<(), ExtractionError> {
        let declared = usize::try_from(declared).unwrap_or(usize::MAX);
        if declared > self.remaining() {
            return Err(self.too_large(declared));
        }
        Ok(())
    }

    /// Reader over `member` that stops one byte past the budget
    fn bounded<R: Read>(&self, member: R) -> io::Take<R> {
        member.take((self.remaining() as u64).saturating_add(1))
    }

    fn charge(&mut self, read: usize) -> Result<(), ExtractionError> {
        if read > self.remaining() {
            return Err(self.too_large(read));
        }
        self.used += read;
        Ok(())
    }
}

fn read_member(
    archive: &mut Archive<'_>,
    name: &str,
    budget: &mut Budget,
) -> Result<Option<Vec<u8>>, ExtractionError> {
    let member = match archive.by_name(name) {
        Ok(member) => member,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ExtractionError::Corrupt(format!("{}: {}", name, e))),
    };
    budget.check_declared(member.size())?;

    // Declared sizes can lie; never inflate past the budget
    let mut data = Vec::new();
    budget
        .bounded(member)
        .read_to_end(&mut data)
        .map_err(|e| ExtractionError::Corrupt(format!("{}: {}", name, e)))?;
    budget.charge(data.len())?;
    Ok(Some(data))
}

/// Inflate every member of a zip container without keeping the output,
/// failing once the total passes `limits.max_bytes`.
///
/// Used ahead of parsers that read archives on their own.
pub(super) fn check_archive(data: &[u8], limits: &ExtractLimits) -> Result<(), ExtractionError> {
    let mut archive = open(data)?;
    let mut budget = Budget::new(limits.max_bytes);

    for index in 0..archive.len() {
        let member = archive
            .by_index(index)
            .map_err(|e| ExtractionError::Corrupt(e.to_string()))?;
        let name = member.name().to_string();
        budget.check_declared(member.size())?;

        let read = io::copy(&mut budget.bounded(member), &mut io::sink())
            .map_err(|e| ExtractionError::Corrupt(format!("{}: {}", name, e)))?;
        budget.charge(usize::try_from(read).unwrap_or(usize::MAX))?;
    }
    Ok(())
}

fn collect_paragraphs(
    xml: &[u8],
    markup: &Markup,
    out: &mut Vec<String>,
) -> Result<(), ExtractionError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut current = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == markup.text => in_text = true,
            Ok(Event::End(e)) if e.name().as_ref() == markup.text => in_text = false,
            Ok(Event::End(e)) if e.name().as_ref() == markup.paragraph => {
                flush(&mut current, out)
            }
            Ok(Event::Empty(e)) if markup.breaks.iter().any(|b| *b == e.name().as_ref()) => {
                current.push(' ')
            }
            Ok(Event::Text(t)) if in_text => {
                let text = t
                    .unescape()
                    .map_err(|e| ExtractionError::Corrupt(e.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::CData(t)) if in_text => current.push_str(&String::from_utf8_lossy(&t)),
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ExtractionError::Corrupt(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
        buf.clear();
    }

    flush(&mut current, out);
    Ok(())
}

fn flush(current: &mut String, out: &mut Vec<String>) {
    let line = current.trim();
    if !line.is_empty() {
        out.push(line.to_string());
    }
    current.clear();
}
