//! JSON Schema validation for scan request envelopes.

use jsonschema::{JSONSchema, ValidationError};
use serde_json::Value;
use std::sync::OnceLock;

/// Schema validation result
#[derive(Debug, Clone)]
pub struct SchemaValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Scan request envelope schema
const SCAN_REQUEST_SCHEMA: &str = r#"{
    "$schema": "http://json-schema.org/draft-07/schema#",
    "title": "DLP Scan Request",
    "type": "object",
    "required": ["direction", "items"],
    "properties": {
        "direction": {
            "type": "string",
            "enum": ["inbound", "outbound"]
        },
        "caller": {"type": "string"},
        "items": {
            "type": "array",
            "items": {
                "type": "object",
                "required": ["type"],
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["message", "file"]
                    }
                },
                "oneOf": [
                    {
                        "properties": {
                            "type": {"const": "message"},
                            "content": {
                                "oneOf": [
                                    {"type": "string"},
                                    {
                                        "type": "array",
                                        "items": {
                                            "type": "object",
                                            "required": ["type"],
                                            "properties": {
                                                "type": {"type": "string"},
                                                "text": {"type": "string"}
                                            }
                                        }
                                    }
                                ]
                            }
                        },
                        "required": ["content"]
                    },
                    {
                        "properties": {
                            "type": {"const": "file"},
                            "name": {"type": "string", "minLength": 1},
                            "content_type": {"type": "string"},
                            "data": {
                                "type": "string",
                                "pattern": "^[A-Za-z0-9+/]*={0,2}$"
                            }
                        },
                        "required": ["name", "data"]
                    }
                ]
            }
        }
    },
    "additionalProperties": true
}"#;

// Compiled schema (cached). None if the embedded schema failed to compile.
static SCAN_REQUEST_COMPILED: OnceLock<Option<JSONSchema>> = OnceLock::new();

fn get_scan_request_schema() -> Option<&'static JSONSchema> {
    SCAN_REQUEST_COMPILED
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(SCAN_REQUEST_SCHEMA).ok()?;
            JSONSchema::compile(&schema).ok()
        })
        .as_ref()
}

fn format_validation_errors<'a>(errors: impl Iterator<Item = ValidationError<'a>>) -> Vec<String> {
    errors
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect()
}

/// Validate an already-parsed envelope
pub fn validate_value(value: &Value) -> SchemaValidationResult {
    let Some(schema) = get_scan_request_schema() else {
        return SchemaValidationResult::invalid(vec![
            "Request schema unavailable".to_string()
        ]);
    };

    match schema.validate(value) {
        Ok(_) => SchemaValidationResult::valid(),
        Err(errors) => SchemaValidationResult::invalid(format_validation_errors(errors)),
    }
}

/// Validate a scan request body
pub fn validate_scan_request(body: &str) -> SchemaValidationResult {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            return SchemaValidationResult::invalid(vec![format!("Invalid JSON: {}", e)]);
        }
    };

    validate_value(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_text_request() {
        let body = r#"{
            "direction": "inbound",
            "caller": "user-1",
            "items": [{"type": "message", "content": "Hello"}]
        }"#;
        let result = validate_scan_request(body);
        assert!(result.valid, "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_valid_multipart_and_file() {
        let body = r#"{
            "direction": "outbound",
            "items": [
                {"type": "message", "content": [{"type": "text", "text": "hi"}, {"type": "image_url", "image_url": {}}]},
                {"type": "file", "name": "a.txt", "data": "aGVsbG8="}
            ]
        }"#;
        let result = validate_scan_request(body);
        assert!(result.valid, "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_direction() {
        let body = r#"{"items": []}"#;
        let result = validate_scan_request(body);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("direction")));
    }

    #[test]
    fn test_invalid_direction() {
        let body = r#"{"direction": "sideways", "items": []}"#;
        let result = validate_scan_request(body);
        assert!(!result.valid);
    }

    #[test]
    fn test_file_without_data() {
        let body = r#"{"direction": "inbound", "items": [{"type": "file", "name": "a.txt"}]}"#;
        let result = validate_scan_request(body);
        assert!(!result.valid);
    }

    #[test]
    fn test_unknown_item_type() {
        let body = r#"{"direction": "inbound", "items": [{"type": "video", "url": "x"}]}"#;
        let result = validate_scan_request(body);
        assert!(!result.valid);
    }

    #[test]
    fn test_invalid_json() {
        let result = validate_scan_request("not valid json");
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("Invalid JSON")));
    }
}
