//! Source documents and their stable identity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A document as delivered by a source.
///
/// `id` may be absent, in which case [`Document::doc_id`] derives one from the
/// content. Numeric ids and non-string metadata values are accepted on input
/// and stored as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDocument")]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, Value>>,
}

impl From<RawDocument> for Document {
    fn from(raw: RawDocument) -> Self {
        let metadata = raw
            .metadata
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| value_to_string(v).map(|v| (k, v)))
            .collect();
        Self {
            id: raw.id.and_then(value_to_string),
            text: raw.text.unwrap_or_default(),
            metadata,
        }
    }
}

/// Flatten a JSON scalar to a string. `null` is treated as absent.
pub(crate) fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stable identifier used for checkpoint membership.
    ///
    /// The explicit id when present, otherwise the hex SHA-256 of the text
    /// followed by the `url` metadata value.
    pub fn doc_id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hasher.update(self.url().unwrap_or_default().as_bytes());
        hex(&hasher.finalize())
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn url(&self) -> Option<&str> {
        self.metadata.get("url").map(String::as_str)
    }

    /// Source label recorded on each chunk; `"unknown"` without a url.
    pub fn source(&self) -> &str {
        self.url().unwrap_or("unknown")
    }

    pub fn title(&self) -> &str {
        self.metadata.get("title").map_or("", String::as_str)
    }

    pub fn created_at(&self) -> &str {
        self.metadata.get("created_at").map_or("", String::as_str)
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}
