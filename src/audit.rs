//! Leak-free audit records.
//!
//! Records are built from [`AuditInput`], a projection of a [`ScanResult`]
//! that keeps only category and severity per detection. Spans, matched text
//! and forwarded content never reach a record.

use crate::detection::{Category, Severity};
use crate::policy::{Outcome, ScanResult, SkipReason};
use crate::request::Direction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

/// Log target for audit events
pub const AUDIT_TARGET: &str = "dlp::audit";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write audit record: {0}")]
    Io(#[from] std::io::Error),
}

/// One detection as the audit trail sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    /// "message" or the file name
    pub item: String,
    pub category: Category,
    pub severity: Severity,
}

/// An item that went through unscanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub item: String,
    /// e.g. "skipped: unsupported format"
    pub status: String,
}

/// The parts of a scan result an audit record may use
#[derive(Debug, Clone)]
pub struct AuditInput {
    caller: String,
    direction: Direction,
    outcome: Outcome,
    findings: Vec<Finding>,
    skipped: Vec<(String, SkipReason)>,
    rule_set_version: u64,
}

impl From<&ScanResult> for AuditInput {
    fn from(result: &ScanResult) -> Self {
        let findings = result
            .reports
            .iter()
            .flat_map(|report| {
                report.detections.iter().map(|d| Finding {
                    item: report.item.label().to_string(),
                    category: d.category.clone(),
                    severity: d.severity,
                })
            })
            .collect();

        Self {
            caller: result.caller.clone(),
            direction: result.direction,
            outcome: result.outcome,
            findings,
            skipped: result
                .skipped
                .iter()
                .map(|s| (s.item.label().to_string(), s.reason))
                .collect(),
            rule_set_version: result.rule_set_version,
        }
    }
}

/// Structured detection event for an external sink
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub caller: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub findings: Vec<Finding>,
    pub skipped: Vec<SkippedEntry>,
    pub rule_set_version: u64,
}

impl AuditRecord {
    pub fn from_input(input: AuditInput, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            caller: input.caller,
            direction: input.direction,
            outcome: input.outcome,
            findings: input.findings,
            skipped: input
                .skipped
                .into_iter()
                .map(|(item, reason)| SkippedEntry {
                    item,
                    status: format!("skipped: {}", reason),
                })
                .collect(),
            rule_set_version: input.rule_set_version,
        }
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Writes each record as one JSON field on the `dlp::audit` log target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let json = serde_json::to_string(record)?;
        info!(
            target: AUDIT_TARGET,
            caller = %record.caller,
            outcome = %record.outcome,
            findings = record.findings.len(),
            record = %json,
            "DLP audit"
        );
        Ok(())
    }
}

/// Appends each record as one JSON line to a file
pub struct JsonLinesAuditSink {
    file: Mutex<File>,
}

impl JsonLinesAuditSink {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Builds audit records and hands them to a sink
#[derive(Clone)]
pub struct AuditEmitter {
    sink: Arc<dyn AuditSink>,
}

impl Default for AuditEmitter {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl AuditEmitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Build the record for `result`, stamped now
    pub fn emit(&self, result: &ScanResult) -> AuditRecord {
        AuditRecord::from_input(AuditInput::from(result), Utc::now())
    }

    /// Build the record for `result` and send it to the sink
    pub async fn publish(&self, result: &ScanResult) -> Result<AuditRecord, AuditError> {
        let record = self.emit(result);
        self.sink.record(&record).await?;
        Ok(record)
    }
}
