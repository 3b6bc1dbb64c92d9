//! Sensitive-data detection: categories, rules, rule-set snapshots and the scanner.

pub mod registry;
pub mod rules;
pub mod scanner;

pub use registry::{LoadReport, PatternRegistry, RejectedPattern, RuleSet, Snapshot};
pub use rules::{CategoryToggles, CustomPattern, DetectionRule, PatternError, RuleFamily, RuleOrigin};
pub use scanner::{scan, ScanOutput};

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Every replacement text a redaction can produce
pub const PLACEHOLDERS: &[&str] = &[
    "[REDACTED-SSN]",
    "[REDACTED-CREDIT-CARD]",
    "[REDACTED-BANK-ROUTING]",
    "[REDACTED-BANK-ACCOUNT]",
    "[REDACTED-MRN]",
    "[REDACTED-DOB]",
    "[REDACTED-DATE]",
    "[REDACTED-DIAGNOSIS]",
    "[REDACTED-API-KEY]",
    "[REDACTED-PASSWORD]",
    "[REDACTED-CONNECTION-STRING]",
    "[REDACTED-CLOUD-KEY]",
    "[REDACTED-PRIVATE-KEY]",
    "[REDACTED-CUSTOM]",
];

/// Category of sensitive data a rule reports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Category {
    Ssn,
    CreditCard,
    BankRouting,
    BankAccount,
    MedicalRecordNumber,
    /// Labeled date of birth, day/month first
    DateOfBirth,
    /// Labeled date of birth, year first
    DateOfBirthIso,
    /// Labeled date of birth with a month name
    DateOfBirthTextMonth,
    /// Unlabeled MM/DD/YYYY date
    DateSlash,
    /// Unlabeled YYYY-MM-DD date
    DateIso,
    DiagnosisCode,
    ApiKey,
    Password,
    ConnectionString,
    CloudCredential,
    PrivateKeyBlock,
    /// Administrator-defined pattern, named by its configuration key
    Custom(Arc<str>),
}

impl Category {
    /// Machine-readable name, used in logs and audit records
    pub fn as_str(&self) -> &str {
        match self {
            Category::Ssn => "ssn",
            Category::CreditCard => "credit_card",
            Category::BankRouting => "bank_routing",
            Category::BankAccount => "bank_account",
            Category::MedicalRecordNumber => "medical_record_number",
            Category::DateOfBirth => "date_of_birth",
            Category::DateOfBirthIso => "date_of_birth_iso",
            Category::DateOfBirthTextMonth => "date_of_birth_text_month",
            Category::DateSlash => "date_slash",
            Category::DateIso => "date_iso",
            Category::DiagnosisCode => "diagnosis_code",
            Category::ApiKey => "api_key",
            Category::Password => "password",
            Category::ConnectionString => "connection_string",
            Category::CloudCredential => "cloud_credential",
            Category::PrivateKeyBlock => "private_key",
            Category::Custom(name) => name.as_ref(),
        }
    }

    /// Human-readable name shown to users in rejection summaries
    pub fn display_name(&self) -> &str {
        match self {
            Category::Ssn => "Social Security Number",
            Category::CreditCard => "Credit Card Number",
            Category::BankRouting => "Bank Routing Number",
            Category::BankAccount => "Bank Account Number",
            Category::MedicalRecordNumber => "Medical Record Number",
            Category::DateOfBirth => "Date of Birth",
            Category::DateOfBirthIso => "Date of Birth (ISO format)",
            Category::DateOfBirthTextMonth => "Date of Birth (text month)",
            Category::DateSlash => "Date Pattern (MM/DD/YYYY)",
            Category::DateIso => "Date Pattern (YYYY-MM-DD)",
            Category::DiagnosisCode => "ICD Diagnosis Code",
            Category::ApiKey => "API Key",
            Category::Password => "Inline Password",
            Category::ConnectionString => "Database Connection String",
            Category::CloudCredential => "Cloud Access Key",
            Category::PrivateKeyBlock => "Private Key",
            Category::Custom(name) => name.as_ref(),
        }
    }

    /// Fixed replacement text for a redacted span.
    ///
    /// The placeholder depends only on the category, never on the length or
    /// content of what it replaces. All custom categories share one.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Category::Ssn => "[REDACTED-SSN]",
            Category::CreditCard => "[REDACTED-CREDIT-CARD]",
            Category::BankRouting => "[REDACTED-BANK-ROUTING]",
            Category::BankAccount => "[REDACTED-BANK-ACCOUNT]",
            Category::MedicalRecordNumber => "[REDACTED-MRN]",
            Category::DateOfBirth | Category::DateOfBirthIso | Category::DateOfBirthTextMonth => {
                "[REDACTED-DOB]"
            }
            Category::DateSlash | Category::DateIso => "[REDACTED-DATE]",
            Category::DiagnosisCode => "[REDACTED-DIAGNOSIS]",
            Category::ApiKey => "[REDACTED-API-KEY]",
            Category::Password => "[REDACTED-PASSWORD]",
            Category::ConnectionString => "[REDACTED-CONNECTION-STRING]",
            Category::CloudCredential => "[REDACTED-CLOUD-KEY]",
            Category::PrivateKeyBlock => "[REDACTED-PRIVATE-KEY]",
            Category::Custom(_) => "[REDACTED-CUSTOM]",
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Category::Custom(_))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Severity attached to a rule. Carried through results as metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule match.
///
/// Holds the category, the severity and, when redaction needs it, the byte
/// range of the match in the scanned text. The matched text itself is never
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub category: Category,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Range<usize>>,
}

impl Detection {
    /// Drop the span, for items that are excluded whole rather than redacted
    pub fn without_span(self) -> Self {
        Self { span: None, ..self }
    }
}

/// Join the distinct display names of `detections`, in order of first appearance
pub fn category_list(detections: &[Detection]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for detection in detections {
        let name = detection.category.display_name();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_fixed_per_category() {
        assert_eq!(Category::Ssn.placeholder(), "[REDACTED-SSN]");
        assert_eq!(Category::CreditCard.placeholder(), "[REDACTED-CREDIT-CARD]");
        assert_eq!(
            Category::Custom(Arc::from("internal_id")).placeholder(),
            "[REDACTED-CUSTOM]"
        );
    }

    #[test]
    fn test_every_placeholder_listed() {
        let categories = [
            Category::Ssn,
            Category::CreditCard,
            Category::BankRouting,
            Category::BankAccount,
            Category::MedicalRecordNumber,
            Category::DateOfBirth,
            Category::DateOfBirthIso,
            Category::DateOfBirthTextMonth,
            Category::DateSlash,
            Category::DateIso,
            Category::DiagnosisCode,
            Category::ApiKey,
            Category::Password,
            Category::ConnectionString,
            Category::CloudCredential,
            Category::PrivateKeyBlock,
            Category::Custom(Arc::from("acme")),
        ];
        for category in &categories {
            assert!(PLACEHOLDERS.contains(&category.placeholder()), "{:?}", category);
        }
    }

    #[test]
    fn test_custom_category_names() {
        let category = Category::Custom(Arc::from("internal_id"));
        assert_eq!(category.as_str(), "internal_id");
        assert_eq!(category.display_name(), "internal_id");
        assert!(category.is_custom());
        assert!(!Category::Ssn.is_custom());
    }

    #[test]
    fn test_category_serializes_as_name() {
        let json = serde_json::to_string(&Category::BankRouting).unwrap();
        assert_eq!(json, "\"bank_routing\"");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn test_category_list_dedups_in_order() {
        let detections = vec![
            Detection {
                category: Category::Ssn,
                severity: Severity::Critical,
                span: None,
            },
            Detection {
                category: Category::BankRouting,
                severity: Severity::Critical,
                span: None,
            },
            Detection {
                category: Category::Ssn,
                severity: Severity::Critical,
                span: None,
            },
        ];
        assert_eq!(
            category_list(&detections),
            "Social Security Number, Bank Routing Number"
        );
    }
}
