//! DLP filter CLI.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use dlp_filter::audit::{AuditEmitter, AuditSink, JsonLinesAuditSink, TracingAuditSink};
use dlp_filter::request::{decode_envelope, split_envelopes};
use dlp_filter::{DlpConfig, DlpConfigJson, DlpFilter};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// DLP filter for conversational model traffic
///
/// Reads scan requests (one JSON document, or JSON lines), inspects each for
/// sensitive data and prints one JSON result per request.
#[derive(Parser, Debug)]
#[command(name = "dlp-filter")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file; replaces the individual settings below
    #[arg(long, env = "DLP_CONFIG")]
    config: Option<PathBuf>,

    /// Request file, or "-" for stdin
    #[arg(long, short, env = "DLP_REQUEST", default_value = "-")]
    request: String,

    /// Append audit records to this JSON-lines file (default: log them)
    #[arg(long, env = "DLP_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Validate each request against the envelope schema before scanning
    #[arg(long, env = "DLP_VALIDATE_REQUESTS", action = ArgAction::Set, default_value = "false")]
    validate_requests: bool,

    /// Enable the filter
    #[arg(long, env = "DLP_ENABLED", action = ArgAction::Set, default_value = "true")]
    enabled: bool,

    /// Action on inbound detections: block, redact
    #[arg(long, env = "DLP_MODE", default_value = "block")]
    mode: String,

    /// Detect Social Security Numbers
    #[arg(long, env = "DLP_BLOCK_SSN", action = ArgAction::Set, default_value = "true")]
    block_ssn: bool,

    /// Detect credit card numbers
    #[arg(long, env = "DLP_BLOCK_CREDIT_CARDS", action = ArgAction::Set, default_value = "true")]
    block_credit_cards: bool,

    /// Detect health information (MRN, dates of birth, diagnosis codes)
    #[arg(long, env = "DLP_BLOCK_PHI", action = ArgAction::Set, default_value = "true")]
    block_phi: bool,

    /// Detect credentials (API keys, passwords, connection strings, private keys)
    #[arg(long, env = "DLP_BLOCK_CREDENTIALS", action = ArgAction::Set, default_value = "true")]
    block_credentials: bool,

    /// Detect bank routing and account numbers
    #[arg(long, env = "DLP_BLOCK_BANK_ACCOUNTS", action = ArgAction::Set, default_value = "true")]
    block_bank_accounts: bool,

    /// Detect unlabeled dates
    #[arg(long, env = "DLP_BLOCK_STANDALONE_DATES", action = ArgAction::Set, default_value = "true")]
    block_standalone_dates: bool,

    /// Scan uploaded files
    #[arg(long, env = "DLP_SCAN_FILE_UPLOADS", action = ArgAction::Set, default_value = "true")]
    scan_file_uploads: bool,

    /// Maximum file size to scan, in megabytes
    #[arg(long, env = "DLP_MAX_FILE_SIZE_MB", default_value = "50")]
    max_file_size_mb: u64,

    /// Log each flagged item with its categories
    #[arg(long, env = "DLP_LOG_DETECTIONS", action = ArgAction::Set, default_value = "true")]
    log_detections: bool,

    /// Custom patterns as a JSON object: {"name": "regex"}
    #[arg(long, env = "DLP_CUSTOM_PATTERNS", default_value = "")]
    custom_patterns: String,

    /// Log output format
    #[arg(long, env = "DLP_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Enable verbose debug logging
    #[arg(long, short, env = "VERBOSE", default_value = "false")]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Args {
    fn config(&self) -> Result<DlpConfig> {
        if let Some(path) = &self.config {
            let json = DlpConfigJson::from_path(path)?;
            return Ok(json.into());
        }

        let custom_patterns: BTreeMap<String, String> = if self.custom_patterns.trim().is_empty()
        {
            BTreeMap::new()
        } else {
            serde_json::from_str(&self.custom_patterns)
                .context("--custom-patterns must be a JSON object of name to regex")?
        };

        Ok(DlpConfigJson {
            enabled: self.enabled,
            mode: self.mode.clone(),
            block_ssn: self.block_ssn,
            block_credit_cards: self.block_credit_cards,
            block_phi: self.block_phi,
            block_credentials: self.block_credentials,
            block_bank_accounts: self.block_bank_accounts,
            block_standalone_dates: self.block_standalone_dates,
            scan_file_uploads: self.scan_file_uploads,
            max_file_size_mb: self.max_file_size_mb,
            log_detections: self.log_detections,
            custom_patterns,
        }
        .into())
    }
}

async fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("failed to read requests from stdin")?;
        Ok(input)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("failed to read requests from {}", source))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries results
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    match args.log_format {
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }

    let config = args.config()?;
    info!("Starting DLP filter");
    info!("  Requests: {}", args.request);
    info!("  Schema validation: {}", args.validate_requests);

    let dlp = Arc::new(DlpFilter::new(config));

    let sink: Arc<dyn AuditSink> = match &args.audit_log {
        Some(path) => {
            info!("  Audit log: {}", path.display());
            Arc::new(
                JsonLinesAuditSink::open(path)
                    .await
                    .with_context(|| format!("failed to open audit log {}", path.display()))?,
            )
        }
        None => Arc::new(TracingAuditSink),
    };
    let emitter = AuditEmitter::new(sink);

    let input = read_input(&args.request).await?;

    // A bad request gets an error line; the rest of the batch still runs
    let mut pending = Vec::new();
    for (n, envelope) in split_envelopes(&input).into_iter().enumerate() {
        let decoded = match envelope {
            Ok(value) => decode_envelope(value, args.validate_requests),
            Err(e) => Err(vec![format!("invalid JSON: {}", e)]),
        };

        match decoded {
            Ok(request) => {
                let dlp = Arc::clone(&dlp);
                pending.push(Ok(tokio::task::spawn_blocking(move || dlp.inspect(&request))));
            }
            Err(errors) => {
                warn!("Rejected request #{}: {}", n + 1, errors.join("; "));
                pending.push(Err(serde_json::json!({
                    "request": n + 1,
                    "errors": errors,
                })));
            }
        }
    }

    info!("Scanning {} request(s)", pending.len());

    // Results are printed in input order
    for (n, task) in pending.into_iter().enumerate() {
        let line = match task {
            Ok(handle) => match handle.await {
                Ok(result) => {
                    if let Err(e) = emitter.publish(&result).await {
                        warn!("Failed to write audit record: {}", e);
                    }
                    serde_json::to_string(&result)?
                }
                Err(e) => {
                    warn!("Scan of request #{} failed: {}", n + 1, e);
                    serde_json::json!({
                        "request": n + 1,
                        "errors": [format!("scan failed: {}", e)],
                    })
                    .to_string()
                }
            },
            Err(rejection) => rejection.to_string(),
        };
        println!("{}", line);
    }

    Ok(())
}
