//! Scan requests: the content of one conversation turn, and its JSON envelope.
//!
//! The envelope accepted from the upstream producer looks like:
//!
//! ```json
//! {
//!   "direction": "inbound",
//!   "caller": "user-42",
//!   "items": [
//!     {"type": "message", "content": "plain text"},
//!     {"type": "message", "content": [{"type": "text", "text": "..."}, {"type": "image_url", "image_url": {}}]},
//!     {"type": "file", "name": "payroll.csv", "content_type": "text/csv", "data": "<base64>"}
//!   ]
//! }
//! ```

pub mod schema;

use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

/// Which side of the model call is being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// User content on its way to the model
    Inbound,
    /// Model response on its way to the user
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One part of a multimodal message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageSegment {
    Text(String),
    /// Non-text part (image, audio, ...), carried through untouched
    Other(Value),
}

impl Serialize for MessageSegment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessageSegment::Text(text) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "text")?;
                map.serialize_entry("text", text)?;
                map.end()
            }
            MessageSegment::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MessageSegment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_text = value.get("type").and_then(Value::as_str) == Some("text");
        match value.get("text").and_then(Value::as_str) {
            Some(text) if is_text => Ok(MessageSegment::Text(text.to_string())),
            _ if value.is_object() => Ok(MessageSegment::Other(value)),
            _ => Err(de::Error::custom("message segment must be an object")),
        }
    }
}

/// Message body: plain text or a list of segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessageSegment>),
}

impl MessageContent {
    /// Text to scan: text segments joined by a single space, others ignored
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text),
            MessageContent::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .filter_map(|p| match p {
                        MessageSegment::Text(t) => Some(t.as_str()),
                        MessageSegment::Other(_) => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }

    /// Byte range each text segment occupies in [`MessageContent::text`], in order
    pub fn text_ranges(&self) -> Vec<Range<usize>> {
        match self {
            MessageContent::Text(text) => vec![0..text.len()],
            MessageContent::Parts(parts) => {
                let mut ranges = Vec::new();
                let mut offset = 0;
                for part in parts {
                    if let MessageSegment::Text(t) = part {
                        ranges.push(offset..offset + t.len());
                        offset += t.len() + 1;
                    }
                }
                ranges
            }
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// An uploaded file attached to a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    /// Declared MIME type, if the producer supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// One unit of content to scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Message { content: MessageContent },
    File(UploadedFile),
}

impl ContentItem {
    pub fn message(content: impl Into<MessageContent>) -> Self {
        ContentItem::Message {
            content: content.into(),
        }
    }
}

fn default_caller() -> String {
    "unknown".to_string()
}

/// Everything one conversation turn hands to the filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub direction: Direction,
    /// Opaque caller identity, used only for audit attribution
    #[serde(default = "default_caller")]
    pub caller: String,
    #[serde(default)]
    pub items: Vec<ContentItem>,
}

impl ScanRequest {
    pub fn new(direction: Direction, caller: impl Into<String>) -> Self {
        Self {
            direction,
            caller: caller.into(),
            items: Vec::new(),
        }
    }

    pub fn inbound(caller: impl Into<String>) -> Self {
        Self::new(Direction::Inbound, caller)
    }

    pub fn outbound(caller: impl Into<String>) -> Self {
        Self::new(Direction::Outbound, caller)
    }

    pub fn with_message(mut self, content: impl Into<MessageContent>) -> Self {
        self.items.push(ContentItem::message(content));
        self
    }

    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.items.push(ContentItem::File(file));
        self
    }
}

/// Parse a single request envelope
pub fn parse_request(body: &str) -> Result<ScanRequest, serde_json::Error> {
    serde_json::from_str(body)
}

/// Split input holding one envelope, or several concatenated / one per line,
/// into raw JSON values.
///
/// A syntax error yields one `Err` entry; reading resumes on the line after
/// the one holding the error.
pub fn split_envelopes(input: &str) -> Vec<Result<Value, serde_json::Error>> {
    let mut values = Vec::new();
    let mut rest = input;

    loop {
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        let mut failed = false;
        for value in stream.by_ref() {
            failed = value.is_err();
            values.push(value);
            if failed {
                break;
            }
        }
        if !failed {
            return values;
        }

        let tail = rest[stream.byte_offset()..].trim_start();
        match tail.find('\n') {
            Some(end) => rest = &tail[end + 1..],
            None => return values,
        }
    }
}

/// Turn one raw envelope into a request, checking it against the envelope
/// schema first when `validate` is set. Errors are safe to echo to the caller.
pub fn decode_envelope(value: Value, validate: bool) -> Result<ScanRequest, Vec<String>> {
    if validate {
        let validation = schema::validate_value(&value);
        if !validation.valid {
            return Err(validation.errors);
        }
    }
    serde_json::from_value(value).map_err(|e| vec![format!("invalid scan request: {}", e)])
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
