//! Turns detections into a decision and sanitized content.
//!
//! The decision depends on direction and mode only:
//!
//! | direction | mode   | detections | outcome         |
//! |-----------|--------|------------|-----------------|
//! | any       | any    | none       | `Allow`         |
//! | inbound   | block  | some       | `Reject`        |
//! | inbound   | redact | some       | `AllowModified` |
//! | outbound  | any    | some       | `AllowModified` |
//!
//! Severity never changes the outcome.

use crate::detection::{category_list, Category, Detection};
use crate::extract::ExtractionError;
use crate::request::{ContentItem, Direction, MessageContent, MessageSegment, ScanRequest};
use crate::DlpMode;
use serde::Serialize;
use std::fmt;
use std::ops::Range;

/// Final decision for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Forward the content unchanged
    Allow,
    /// Forward nothing; show the user the rejection summary
    Reject,
    /// Forward the sanitized content instead of the original
    AllowModified,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Allow => "allow",
            Outcome::Reject => "reject",
            Outcome::AllowModified => "allow_modified",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one item of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ItemRef {
    Message { index: usize },
    File { index: usize, name: String },
}

impl ItemRef {
    pub fn index(&self) -> usize {
        match self {
            ItemRef::Message { index } | ItemRef::File { index, .. } => *index,
        }
    }

    /// "message", or the file name
    pub fn label(&self) -> &str {
        match self {
            ItemRef::Message { .. } => "message",
            ItemRef::File { name, .. } => name,
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, ItemRef::Message { .. })
    }
}

/// Why an item was not scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnsupportedFormat,
    TooLarge,
    Corrupt,
    ScanningDisabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnsupportedFormat => "unsupported format",
            SkipReason::TooLarge => "exceeds size limit",
            SkipReason::Corrupt => "corrupt content",
            SkipReason::ScanningDisabled => "file scanning disabled",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExtractionError> for SkipReason {
    fn from(error: &ExtractionError) -> Self {
        match error {
            ExtractionError::Unsupported(_) => SkipReason::UnsupportedFormat,
            ExtractionError::TooLarge { .. } => SkipReason::TooLarge,
            ExtractionError::Corrupt(_) => SkipReason::Corrupt,
        }
    }
}

/// An item that passed through without being scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedItem {
    pub item: ItemRef,
    pub reason: SkipReason,
}

/// Scanner output for one item, as handed to the policy engine
#[derive(Debug, Clone)]
pub struct ItemScan {
    pub item: ItemRef,
    pub detections: Vec<Detection>,
    /// Every rule ran to completion on this item
    pub complete: bool,
}

/// Detections found in one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub item: ItemRef,
    pub detections: Vec<Detection>,
}

/// Everything the policy engine needs besides the request itself
#[derive(Debug, Clone)]
pub struct PolicyInput {
    pub mode: DlpMode,
    pub scans: Vec<ItemScan>,
    pub skipped: Vec<SkippedItem>,
    pub rule_set_version: u64,
}

/// Decision and sanitized content for one turn
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    pub direction: Direction,
    pub caller: String,
    pub outcome: Outcome,
    /// Items with at least one detection
    pub reports: Vec<ItemReport>,
    /// Content to forward, present for `AllowModified`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentItem>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_files: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    /// User-facing explanation, present for `Reject`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// User-facing note about removed files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub rule_set_version: u64,
}

impl ScanResult {
    /// Result for a turn that was not inspected at all
    pub fn passthrough(request: &ScanRequest, rule_set_version: u64) -> Self {
        Self {
            direction: request.direction,
            caller: request.caller.clone(),
            outcome: Outcome::Allow,
            reports: Vec::new(),
            content: None,
            excluded_files: Vec::new(),
            skipped: Vec::new(),
            summary: None,
            notice: None,
            rule_set_version,
        }
    }

    /// All detections across items, in item order
    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.reports.iter().flat_map(|r| r.detections.iter())
    }

    pub fn is_rejected(&self) -> bool {
        self.outcome == Outcome::Reject
    }
}

/// Pick the outcome.
///
/// `primary_unscanned` means a rule faulted on message text; inbound block
/// mode then rejects rather than forward text it could not fully inspect.
pub fn decide(
    direction: Direction,
    mode: DlpMode,
    detected: bool,
    primary_unscanned: bool,
) -> Outcome {
    match (direction, mode) {
        (Direction::Inbound, DlpMode::Block) if detected || primary_unscanned => Outcome::Reject,
        _ if detected => Outcome::AllowModified,
        _ => Outcome::Allow,
    }
}

/// Apply the policy to a scanned request
pub fn evaluate(request: &ScanRequest, input: PolicyInput) -> ScanResult {
    let detected = input.scans.iter().any(|s| !s.detections.is_empty());
    let primary_unscanned = input
        .scans
        .iter()
        .any(|s| s.item.is_message() && !s.complete);
    let outcome = decide(request.direction, input.mode, detected, primary_unscanned);

    let reports: Vec<ItemReport> = input
        .scans
        .into_iter()
        .filter(|s| !s.detections.is_empty())
        .map(|s| {
            let detections = if s.item.is_message() {
                s.detections
            } else {
                s.detections.into_iter().map(Detection::without_span).collect()
            };
            ItemReport {
                item: s.item,
                detections,
            }
        })
        .collect();

    let mut result = ScanResult {
        direction: request.direction,
        caller: request.caller.clone(),
        outcome,
        reports,
        content: None,
        excluded_files: Vec::new(),
        skipped: input.skipped,
        summary: None,
        notice: None,
        rule_set_version: input.rule_set_version,
    };

    match outcome {
        Outcome::Allow => {}
        Outcome::Reject => {
            result.summary = Some(rejection_summary(&result.reports, primary_unscanned));
        }
        Outcome::AllowModified => {
            let (content, excluded) = sanitize(request, &result.reports);
            if !excluded.is_empty() {
                result.notice = Some(removed_files_notice(&excluded));
            }
            result.content = Some(content);
            result.excluded_files = excluded;
        }
    }

    result
}

fn sanitize(request: &ScanRequest, reports: &[ItemReport]) -> (Vec<ContentItem>, Vec<String>) {
    let report_for = |index: usize| reports.iter().find(|r| r.item.index() == index);

    let mut content = Vec::with_capacity(request.items.len());
    let mut excluded = Vec::new();

    for (index, item) in request.items.iter().enumerate() {
        match (item, report_for(index)) {
            (ContentItem::Message { content: message }, Some(report)) => {
                content.push(ContentItem::Message {
                    content: redact_content(message, &report.detections),
                });
            }
            (ContentItem::File(file), Some(_)) => excluded.push(file.name.clone()),
            (item, None) => content.push(item.clone()),
        }
    }

    (content, excluded)
}

/// Merge overlapping detection spans.
///
/// Each merged span keeps the category of the detection with the earliest
/// start, then the longest span, then the earliest rule.
pub fn merge_spans(detections: &[Detection]) -> Vec<(Range<usize>, Category)> {
    let mut spans: Vec<(usize, &Range<usize>, &Category)> = detections
        .iter()
        .enumerate()
        .filter_map(|(order, d)| d.span.as_ref().map(|span| (order, span, &d.category)))
        .collect();
    spans.sort_by_key(|(order, span, _)| (span.start, std::cmp::Reverse(span.end), *order));

    let mut merged: Vec<(Range<usize>, Category)> = Vec::new();
    for (_, span, category) in spans {
        match merged.last_mut() {
            Some((current, _)) if span.start < current.end => {
                current.end = current.end.max(span.end);
            }
            _ => merged.push((span.clone(), category.clone())),
        }
    }
    merged
}

/// Replace every detected span of `text` with its category placeholder
pub fn redact_text(text: &str, detections: &[Detection]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, category) in merge_spans(detections) {
        if span.start < cursor || span.end > text.len() {
            continue;
        }
        out.push_str(&text[cursor..span.start]);
        out.push_str(&category.placeholder());
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Redact message content whose text was scanned as [`MessageContent::text`].
///
/// Spans are mapped back onto the text segments. A span crossing segments puts
/// its placeholder in the first segment it touches and removes the covered text
/// from the rest. Non-text segments are kept as they are.
pub fn redact_content(content: &MessageContent, detections: &[Detection]) -> MessageContent {
    let parts = match content {
        MessageContent::Text(text) => return MessageContent::Text(redact_text(text, detections)),
        MessageContent::Parts(parts) => parts,
    };

    let merged = merge_spans(detections);
    let mut placed = vec![false; merged.len()];
    let ranges = content.text_ranges();
    let mut text_index = 0;

    let redacted = parts
        .iter()
        .map(|part| {
            let MessageSegment::Text(text) = part else {
                return part.clone();
            };
            let Some(range) = ranges.get(text_index) else {
                return part.clone();
            };
            text_index += 1;

            let mut out = String::with_capacity(text.len());
            let mut cursor = 0;
            for (i, (span, category)) in merged.iter().enumerate() {
                if span.end <= range.start || span.start >= range.end {
                    continue;
                }
                let start = span.start.max(range.start) - range.start;
                let end = span.end.min(range.end) - range.start;
                if start < cursor {
                    continue;
                }
                out.push_str(&text[cursor..start]);
                if !placed[i] {
                    out.push_str(&category.placeholder());
                    placed[i] = true;
                }
                cursor = end;
            }
            out.push_str(&text[cursor..]);
            MessageSegment::Text(out)
        })
        .collect();

    MessageContent::Parts(redacted)
}

/// User-facing explanation of a rejection. Names categories, never values.
pub fn rejection_summary(reports: &[ItemReport], primary_unscanned: bool) -> String {
    let mut parts = Vec::new();

    let message_detections: Vec<Detection> = reports
        .iter()
        .filter(|r| r.item.is_message())
        .flat_map(|r| r.detections.iter().cloned())
        .collect();
    if !message_detections.is_empty() {
        parts.push(format!(
            "Your message text contains sensitive information ({}).",
            category_list(&message_detections)
        ));
    } else if primary_unscanned {
        parts.push("Your message text could not be fully scanned.".to_string());
    }

    let file_lines: Vec<String> = reports
        .iter()
        .filter(|r| !r.item.is_message())
        .map(|r| format!("  - **{}**: {}", r.item.label(), category_list(&r.detections)))
        .collect();
    if !file_lines.is_empty() {
        parts.push(format!(
            "Uploaded files contain sensitive information:\n{}",
            file_lines.join("\n")
        ));
    }

    format!(
        "**DLP Filter Blocked This Message**\n\n{}\n\n\
         For security and compliance, this message has been blocked from being sent \
         to the AI service.\n\nPlease remove the sensitive data and try again.",
        parts.join("\n\n")
    )
}

/// Note shown to the user when flagged files were dropped
pub fn removed_files_notice(files: &[String]) -> String {
    format!(
        "[DLP Notice] The following files were removed because they contain sensitive \
         data: {}. The AI will not see these files.",
        files.join(", ")
    )
}
