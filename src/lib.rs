//! DLP filter for conversational model traffic.
//!
//! Inspects every inbound user message and uploaded file before it reaches a
//! model, and every outbound model response before it reaches the user:
//! - Content extraction from spreadsheets, delimited text, PDF, Word,
//!   PowerPoint and plain-text files
//! - Rule-based detection of personal identifiers, health information,
//!   credentials and bank data, plus administrator-defined patterns
//! - Block or redact decisions per direction
//! - Leak-free audit records
//!
//! ```no_run
//! use dlp_filter::{DlpConfig, DlpFilter, ScanRequest};
//!
//! let filter = DlpFilter::new(DlpConfig::default());
//! let result = filter.inspect(&ScanRequest::inbound("user-1").with_message("My SSN is 123-45-6789"));
//! assert!(result.is_rejected());
//! ```

pub mod audit;
pub mod detection;
pub mod extract;
pub mod policy;
pub mod request;

pub use audit::{
    AuditEmitter, AuditError, AuditRecord, AuditSink, JsonLinesAuditSink, TracingAuditSink,
};
pub use detection::{Category, CategoryToggles, Detection, LoadReport, RuleSet, Severity};
pub use extract::{ExtractLimits, ExtractionError};
pub use policy::{Outcome, ScanResult};
pub use request::{ContentItem, Direction, MessageContent, ScanRequest, UploadedFile};

use detection::{scan, PatternRegistry};
use policy::{ItemRef, ItemScan, PolicyInput, SkipReason, SkippedItem};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do with inbound content that contains sensitive data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DlpMode {
    /// Reject the whole turn
    #[default]
    Block,
    /// Replace matches with placeholders and drop flagged files
    Redact,
}

impl std::str::FromStr for DlpMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(DlpMode::Block),
            "redact" => Ok(DlpMode::Redact),
            _ => Err(format!("Invalid DLP mode: {}", s)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// JSON-serializable configuration for the DLP filter
///
/// Used for the administrator-facing configuration document. Every field is
/// optional and falls back to the deployment default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DlpConfigJson {
    /// Master switch; when off every turn passes unscanned
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "block" or "redact"
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub block_ssn: bool,
    #[serde(default = "default_true")]
    pub block_credit_cards: bool,
    #[serde(default = "default_true")]
    pub block_phi: bool,
    #[serde(default = "default_true")]
    pub block_credentials: bool,
    #[serde(default = "default_true")]
    pub block_bank_accounts: bool,
    /// Unlabeled dates (MM/DD/YYYY, YYYY-MM-DD)
    #[serde(default = "default_true")]
    pub block_standalone_dates: bool,
    #[serde(default = "default_true")]
    pub scan_file_uploads: bool,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// Log each flagged item with its categories
    #[serde(default = "default_true")]
    pub log_detections: bool,
    /// Name → regex. Also accepted as a JSON-encoded string of that object.
    #[serde(default, deserialize_with = "deserialize_custom_patterns")]
    pub custom_patterns: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_mode() -> String {
    "block".to_string()
}

fn default_max_file_size_mb() -> u64 {
    50
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CustomPatternsField {
    Map(BTreeMap<String, String>),
    Encoded(String),
}

fn deserialize_custom_patterns<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<CustomPatternsField>::deserialize(deserializer)? {
        None => Ok(BTreeMap::new()),
        Some(CustomPatternsField::Map(map)) => Ok(map),
        Some(CustomPatternsField::Encoded(encoded)) if encoded.trim().is_empty() => {
            Ok(BTreeMap::new())
        }
        Some(CustomPatternsField::Encoded(encoded)) => {
            match serde_json::from_str::<BTreeMap<String, String>>(&encoded) {
                Ok(map) => Ok(map),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed custom_patterns");
                    Ok(BTreeMap::new())
                }
            }
        }
    }
}

impl Default for DlpConfigJson {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_mode(),
            block_ssn: true,
            block_credit_cards: true,
            block_phi: true,
            block_credentials: true,
            block_bank_accounts: true,
            block_standalone_dates: true,
            scan_file_uploads: true,
            max_file_size_mb: default_max_file_size_mb(),
            log_detections: true,
            custom_patterns: BTreeMap::new(),
        }
    }
}

impl DlpConfigJson {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

impl From<DlpConfigJson> for DlpConfig {
    fn from(json: DlpConfigJson) -> Self {
        let mode = json.mode.parse::<DlpMode>().unwrap_or_else(|e| {
            warn!("{}, defaulting to 'block'", e);
            DlpMode::Block
        });
        Self {
            enabled: json.enabled,
            mode,
            toggles: CategoryToggles {
                ssn: json.block_ssn,
                credit_cards: json.block_credit_cards,
                phi: json.block_phi,
                credentials: json.block_credentials,
                bank_accounts: json.block_bank_accounts,
                standalone_dates: json.block_standalone_dates,
            },
            scan_file_uploads: json.scan_file_uploads,
            max_file_size_mb: json.max_file_size_mb,
            log_detections: json.log_detections,
            custom_patterns: json.custom_patterns,
        }
    }
}

/// Configuration for the DLP filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlpConfig {
    /// Master switch
    pub enabled: bool,
    /// Action on inbound detections
    pub mode: DlpMode,
    /// Built-in rule families to run
    pub toggles: CategoryToggles,
    /// Scan uploaded files (otherwise they pass through unscanned)
    pub scan_file_uploads: bool,
    /// Per-file ceiling, in megabytes
    pub max_file_size_mb: u64,
    /// Log each flagged item with its categories
    pub log_detections: bool,
    /// Administrator-defined patterns, name → regex
    pub custom_patterns: BTreeMap<String, String>,
}

impl Default for DlpConfig {
    fn default() -> Self {
        DlpConfigJson::default().into()
    }
}

impl DlpConfig {
    /// Per-file ceiling in bytes
    pub fn max_file_bytes(&self) -> usize {
        usize::try_from(self.max_file_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// DLP filter
///
/// Cheap to share across threads. Each call to [`DlpFilter::inspect`] takes
/// one consistent (configuration, rule set) snapshot and uses it for the whole
/// turn; a concurrent [`DlpFilter::reconfigure`] only affects later turns.
pub struct DlpFilter {
    registry: PatternRegistry<DlpConfig>,
}

impl DlpFilter {
    /// Create a new DLP filter with the given configuration
    pub fn new(config: DlpConfig) -> Self {
        log_config(&config);
        let registry = PatternRegistry::with_settings(config.clone());
        registry.reload(&config.toggles, &config.custom_patterns);
        Self { registry }
    }

    /// Replace the configuration and rebuild the rule set.
    ///
    /// Turns already in progress finish with the previous configuration.
    /// Invalid custom patterns are left out and listed in the report.
    pub fn reconfigure(&self, config: DlpConfig) -> LoadReport {
        info!("Reconfiguring DLP filter");
        log_config(&config);

        let report = self
            .registry
            .reload_with(config.clone(), &config.toggles, &config.custom_patterns);

        debug!(
            version = report.snapshot.version(),
            "DLP filter reconfigured successfully"
        );
        report
    }

    /// Current configuration
    pub fn config(&self) -> DlpConfig {
        self.registry.current().settings.clone()
    }

    /// Current rule-set snapshot
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.registry.snapshot()
    }

    /// Inspect one turn and decide what may be forwarded
    pub fn inspect(&self, request: &ScanRequest) -> ScanResult {
        let current = self.registry.current();
        let config = &current.settings;
        let rules = &current.rules;

        if !config.enabled {
            debug!(caller = %request.caller, "DLP filter disabled, passing through");
            return ScanResult::passthrough(request, rules.version());
        }

        let limits = ExtractLimits::new(config.max_file_bytes());
        let mut scans = Vec::with_capacity(request.items.len());
        let mut skipped = Vec::new();

        for (index, item) in request.items.iter().enumerate() {
            match item {
                ContentItem::Message { content } => {
                    let output = scan(&content.text(), rules);
                    let item = ItemRef::Message { index };
                    if !output.is_complete() {
                        warn!(
                            caller = %request.caller,
                            faulted = output.faulted_rules.len(),
                            "Message text not fully scanned"
                        );
                    }
                    self.log_detections(config, request, &item, &output.detections);
                    scans.push(ItemScan {
                        item,
                        complete: output.is_complete(),
                        detections: output.detections,
                    });
                }
                ContentItem::File(file) => {
                    let item = ItemRef::File {
                        index,
                        name: file.name.clone(),
                    };
                    if !config.scan_file_uploads {
                        skipped.push(SkippedItem {
                            item,
                            reason: SkipReason::ScanningDisabled,
                        });
                        continue;
                    }

                    match extract::extract(file, &limits) {
                        Ok(text) => {
                            let output = scan(&text, rules);
                            self.log_detections(config, request, &item, &output.detections);
                            scans.push(ItemScan {
                                item,
                                complete: output.is_complete(),
                                detections: output.detections,
                            });
                        }
                        Err(error) => {
                            match &error {
                                ExtractionError::Unsupported(_) => {
                                    info!(file = %file.name, error = %error, "Skipping file");
                                }
                                ExtractionError::TooLarge { .. } | ExtractionError::Corrupt(_) => {
                                    warn!(file = %file.name, error = %error, "Skipping file");
                                }
                            }
                            skipped.push(SkippedItem {
                                item,
                                reason: SkipReason::from(&error),
                            });
                        }
                    }
                }
            }
        }

        let result = policy::evaluate(
            request,
            PolicyInput {
                mode: config.mode,
                scans,
                skipped,
                rule_set_version: rules.version(),
            },
        );

        if result.outcome == Outcome::Allow {
            debug!(caller = %request.caller, direction = %request.direction, "Allowed");
        } else {
            info!(
                caller = %request.caller,
                direction = %request.direction,
                outcome = %result.outcome,
                flagged_items = result.reports.len(),
                excluded_files = result.excluded_files.len(),
                "DLP decision"
            );
        }

        result
    }

    fn log_detections(
        &self,
        config: &DlpConfig,
        request: &ScanRequest,
        item: &ItemRef,
        detections: &[Detection],
    ) {
        if !config.log_detections || detections.is_empty() {
            return;
        }
        let summary = detections
            .iter()
            .map(|d| format!("{} ({})", d.category, d.severity))
            .collect::<Vec<_>>()
            .join(", ");
        warn!(
            caller = %request.caller,
            item = item.label(),
            "Sensitive data detected: {}",
            summary
        );
    }
}

fn log_config(config: &DlpConfig) {
    info!("DLP filter configuration");
    info!("  Enabled: {}", config.enabled);
    info!("  Mode: {:?}", config.mode);
    info!("  Categories: {:?}", config.toggles);
    info!("  Scan file uploads: {}", config.scan_file_uploads);
    info!("  Max file size: {} MB", config.max_file_size_mb);
    if !config.custom_patterns.is_empty() {
        info!(
            "  Custom patterns: {:?}",
            config.custom_patterns.keys().collect::<Vec<_>>()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_str() {
        assert_eq!("block".parse::<DlpMode>().unwrap(), DlpMode::Block);
        assert_eq!("REDACT".parse::<DlpMode>().unwrap(), DlpMode::Redact);
        assert!("log".parse::<DlpMode>().is_err());
    }

    #[test]
    fn test_config_json_defaults() {
        let json = DlpConfigJson::from_json_str("{}").unwrap();
        let config = DlpConfig::from(json);
        assert_eq!(config, DlpConfig::default());
        assert!(config.enabled);
        assert_eq!(config.mode, DlpMode::Block);
        assert_eq!(config.toggles, CategoryToggles::all());
        assert_eq!(config.max_file_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_unknown_mode_falls_back_to_block() {
        let json = DlpConfigJson::from_json_str(r#"{"mode": "shout"}"#).unwrap();
        assert_eq!(DlpConfig::from(json).mode, DlpMode::Block);
    }

    #[test]
    fn test_custom_patterns_as_map_or_string() {
        let as_map =
            DlpConfigJson::from_json_str(r#"{"custom_patterns": {"internal_id": "UID-\\d+"}}"#)
                .unwrap();
        let as_string = DlpConfigJson::from_json_str(
            r#"{"custom_patterns": "{\"internal_id\": \"UID-\\\\d+\"}"}"#,
        )
        .unwrap();
        assert_eq!(as_map.custom_patterns, as_string.custom_patterns);
        assert_eq!(as_map.custom_patterns["internal_id"], r"UID-\d+");
    }

    #[test]
    fn test_malformed_custom_patterns_string_ignored() {
        let json = DlpConfigJson::from_json_str(r#"{"custom_patterns": "{not json"}"#).unwrap();
        assert!(json.custom_patterns.is_empty());
        let json = DlpConfigJson::from_json_str(r#"{"custom_patterns": ""}"#).unwrap();
        assert!(json.custom_patterns.is_empty());
    }

    #[test]
    fn test_toggles_mapped() {
        let json =
            DlpConfigJson::from_json_str(r#"{"block_phi": false, "block_standalone_dates": false}"#)
                .unwrap();
        let config = DlpConfig::from(json);
        assert!(!config.toggles.phi);
        assert!(!config.toggles.standalone_dates);
        assert!(config.toggles.ssn);
    }

    #[test]
    fn test_filter_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DlpFilter>();
    }

    #[test]
    fn test_disabled_filter_passes_through() {
        let filter = DlpFilter::new(DlpConfig {
            enabled: false,
            ..DlpConfig::default()
        });
        let result = filter.inspect(&ScanRequest::inbound("u").with_message("SSN 123-45-6789"));
        assert_eq!(result.outcome, Outcome::Allow);
        assert!(result.reports.is_empty());
    }

    #[test]
    fn test_file_scanning_disabled_recorded() {
        let filter = DlpFilter::new(DlpConfig {
            scan_file_uploads: false,
            ..DlpConfig::default()
        });
        let request = ScanRequest::inbound("u")
            .with_message("hello")
            .with_file(UploadedFile::new("ssn.txt", b"123-45-6789".to_vec()));
        let result = filter.inspect(&request);
        assert_eq!(result.outcome, Outcome::Allow);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].reason, SkipReason::ScanningDisabled);
    }

    #[test]
    fn test_reconfigure_swaps_config_and_rules() {
        let filter = DlpFilter::new(DlpConfig::default());
        let before = filter.snapshot();

        let report = filter.reconfigure(DlpConfig {
            mode: DlpMode::Redact,
            ..DlpConfig::default()
        });

        assert!(report.is_clean());
        assert_eq!(filter.config().mode, DlpMode::Redact);
        assert!(filter.snapshot().version() > before.version());
        assert_eq!(before.version(), 1);
    }
}
