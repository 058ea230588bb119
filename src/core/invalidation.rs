//! Invalidation Detection
//!
//! Classification of successful response bodies that still signal an
//! invalid credential. Some upstreams report an expired session inside a
//! 200-OK payload instead of a 401.

use serde_json::Value;

use crate::types::InvalidationConfig;

/// Pluggable matcher for invalidation signalled inside a response body.
pub trait InvalidationDetector: Send + Sync {
    /// Whether `body` signals that the credential used is no longer valid.
    fn is_invalidated(&self, body: &str) -> bool;
}

/// Matches marker substrings in configured JSON status fields.
///
/// Field names and markers compare case-insensitively. When the body is not
/// JSON and `scan_raw_body` is set, the raw text is scanned instead.
#[derive(Debug, Clone)]
pub struct StatusFieldDetector {
    fields: Vec<String>,
    markers: Vec<String>,
    scan_raw_body: bool,
}

impl StatusFieldDetector {
    pub fn new(config: &InvalidationConfig) -> Self {
        Self {
            fields: config.status_fields.iter().map(|f| f.to_lowercase()).collect(),
            markers: config
                .markers
                .iter()
                .filter(|m| !m.trim().is_empty())
                .map(|m| m.to_uppercase())
                .collect(),
            scan_raw_body: config.scan_raw_body,
        }
    }

    fn contains_marker(&self, text: &str) -> bool {
        let upper = text.to_uppercase();
        self.markers.iter().any(|marker| upper.contains(marker))
    }

    fn object_matches(&self, object: &serde_json::Map<String, Value>) -> bool {
        object.iter().any(|(key, value)| {
            self.fields.contains(&key.to_lowercase())
                && value.as_str().map(|s| self.contains_marker(s)).unwrap_or(false)
        })
    }
}

impl Default for StatusFieldDetector {
    fn default() -> Self {
        Self::new(&InvalidationConfig::default())
    }
}

impl InvalidationDetector for StatusFieldDetector {
    fn is_invalidated(&self, body: &str) -> bool {
        if self.markers.is_empty() {
            return false;
        }

        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(object)) => self.object_matches(&object),
            Ok(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_object)
                .any(|object| self.object_matches(object)),
            Ok(Value::String(text)) => self.contains_marker(&text),
            Ok(_) => false,
            Err(_) => self.scan_raw_body && self.contains_marker(body),
        }
    }
}
