//! Stage entry: the outcome of one stage for one item.

use serde_json::Value;

use super::EntryStatus;
use crate::errors::LoadError;
use crate::utils::{format_iso8601, parse_timestamp, Timestamp};

/// Stage-specific payload recorded with an entry (broker id, file name,
/// storage path, remote URL, ...).
pub type Attributes = serde_json::Map<String, Value>;

/// Keys written by the ledger itself; attributes may not use them.
pub const RESERVED_ATTRIBUTES: [&str; 4] = ["status", "completed_at", "failed_at", "error"];

/// The recorded outcome of one stage for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEntry {
    /// Completed or failed.
    pub status: EntryStatus,
    /// Stage-specific payload.
    pub attributes: Attributes,
    /// Completion or failure time.
    pub timestamp: Timestamp,
    /// Diagnostic text, present only for failed entries.
    pub error: Option<String>,
}

impl StageEntry {
    /// Creates a completed entry.
    #[must_use]
    pub fn completed(attributes: Attributes, at: Timestamp) -> Self {
        Self {
            status: EntryStatus::Completed,
            attributes,
            timestamp: at,
            error: None,
        }
    }

    /// Creates a failed entry.
    #[must_use]
    pub fn failed(error: impl Into<String>, at: Timestamp) -> Self {
        Self {
            status: EntryStatus::Failed,
            attributes: Attributes::new(),
            timestamp: at,
            error: Some(error.into()),
        }
    }

    /// Returns true if the entry is completed.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Returns true if the entry is failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        !self.status.is_completed()
    }

    /// Returns a string attribute, if present.
    #[must_use]
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Converts the entry to its ledger JSON object.
    ///
    /// Attributes are flattened next to `status`, the status timestamp
    /// field, and `error` for failures.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut map = self.attributes.clone();
        map.insert("status".to_string(), Value::String(self.status.to_string()));
        map.insert(
            self.status.timestamp_field().to_string(),
            Value::String(format_iso8601(&self.timestamp)),
        );
        if let Some(ref error) = self.error {
            map.insert("error".to_string(), Value::String(error.clone()));
        }
        Value::Object(map)
    }

    /// Parses an entry from its ledger JSON object.
    ///
    /// Entries written without a `status` field are classified by which
    /// timestamp field they carry.
    pub fn from_json(value: &Value) -> Result<Self, LoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| LoadError::malformed("entry is not an object"))?;

        let status = match map.get("status").and_then(Value::as_str) {
            Some("completed") => EntryStatus::Completed,
            Some("failed") => EntryStatus::Failed,
            Some(other) => {
                return Err(LoadError::malformed(format!("unknown entry status '{other}'")))
            }
            None if map.contains_key("failed_at") || map.contains_key("error") => {
                EntryStatus::Failed
            }
            None if map.contains_key("completed_at") => EntryStatus::Completed,
            None => return Err(LoadError::malformed("entry has no status")),
        };

        Self::from_map(status, map)
    }

    /// Parses an entry from a legacy failure map, which never carries a
    /// `status` field.
    pub fn from_legacy_failure(value: &Value) -> Result<Self, LoadError> {
        let map = value
            .as_object()
            .ok_or_else(|| LoadError::malformed("failure entry is not an object"))?;
        Self::from_map(EntryStatus::Failed, map)
    }

    fn from_map(status: EntryStatus, map: &Attributes) -> Result<Self, LoadError> {
        let field = status.timestamp_field();
        let raw = map
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::malformed(format!("entry has no '{field}'")))?;
        let timestamp = parse_timestamp(raw)
            .map_err(|e| LoadError::malformed(format!("bad '{field}': {e}")))?;

        let error = match status {
            EntryStatus::Failed => Some(
                map.get("error")
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                    .unwrap_or_default(),
            ),
            EntryStatus::Completed => None,
        };

        let attributes = map
            .iter()
            .filter(|(key, _)| !RESERVED_ATTRIBUTES.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            status,
            attributes,
            timestamp,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn at(raw: &str) -> Timestamp {
        parse_timestamp(raw).unwrap()
    }

    #[test]
    fn test_completed_entry_json_shape() {
        let attributes = json!({"broker_id": "b1", "filename": "b1_C1.wav"})
            .as_object()
            .cloned()
            .unwrap();
        let entry = StageEntry::completed(attributes, at("2024-05-01T10:00:00Z"));

        assert_eq!(
            entry.to_json(),
            json!({
                "status": "completed",
                "broker_id": "b1",
                "filename": "b1_C1.wav",
                "completed_at": "2024-05-01T10:00:00.000000+00:00",
            })
        );
    }

    #[test]
    fn test_failed_entry_json_shape() {
        let entry = StageEntry::failed("HTTP 500", at("2024-05-01T10:00:00Z"));

        assert_eq!(
            entry.to_json(),
            json!({
                "status": "failed",
                "error": "HTTP 500",
                "failed_at": "2024-05-01T10:00:00.000000+00:00",
            })
        );
    }

    #[test]
    fn test_parse_written_entry() {
        let attributes = json!({"file_url": "https://cdn.example/C1.wav"})
            .as_object()
            .cloned()
            .unwrap();
        let entry = StageEntry::completed(attributes, at("2024-05-01T10:00:00.123456Z"));

        assert_eq!(StageEntry::from_json(&entry.to_json()).unwrap(), entry);
    }

    #[test]
    fn test_parse_entry_without_status() {
        let entry = StageEntry::from_json(&json!({
            "error": "timeout",
            "failed_at": "2024-05-01T10:00:00.5",
        }))
        .unwrap();

        assert!(entry.is_failed());
        assert_eq!(entry.error.as_deref(), Some("timeout"));
        assert!(entry.attributes.is_empty());
    }

    #[test]
    fn test_parse_legacy_failure() {
        let entry = StageEntry::from_legacy_failure(&json!({
            "error": "Request error: connection reset",
            "failed_at": "2024-05-01T10:00:00",
        }))
        .unwrap();

        assert!(entry.is_failed());
        assert_eq!(entry.timestamp, at("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_parse_rejects_unknown_status() {
        let result = StageEntry::from_json(&json!({
            "status": "running",
            "completed_at": "2024-05-01T10:00:00Z",
        }));
        assert!(matches!(result, Err(LoadError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_missing_timestamp() {
        let result = StageEntry::from_json(&json!({"status": "completed"}));
        assert!(matches!(result, Err(LoadError::Malformed(_))));
    }

    #[test]
    fn test_attribute_str() {
        let attributes = json!({"filename": "b1_C1.wav", "size": 10})
            .as_object()
            .cloned()
            .unwrap();
        let entry = StageEntry::completed(attributes, at("2024-05-01T10:00:00Z"));

        assert_eq!(entry.attribute_str("filename"), Some("b1_C1.wav"));
        assert_eq!(entry.attribute_str("size"), None);
        assert_eq!(entry.attribute_str("missing"), None);
    }
}
