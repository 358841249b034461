//! Entry status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The recorded outcome of one stage for one item.
///
/// There is no pending variant: an item is pending for a stage exactly when
/// the stage's ledger has no entry for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// The stage finished successfully for the item.
    Completed,
    /// The latest attempt failed.
    Failed,
}

impl EntryStatus {
    /// Returns the name used in the ledger file.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Name of the timestamp field written for this status.
    #[must_use]
    pub const fn timestamp_field(&self) -> &'static str {
        match self {
            Self::Completed => "completed_at",
            Self::Failed => "failed_at",
        }
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_status_display() {
        assert_eq!(EntryStatus::Completed.to_string(), "completed");
        assert_eq!(EntryStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_entry_status_serialize() {
        let json = serde_json::to_string(&EntryStatus::Failed).unwrap();
        assert_eq!(json, r#""failed""#);

        let deserialized: EntryStatus = serde_json::from_str(r#""completed""#).unwrap();
        assert_eq!(deserialized, EntryStatus::Completed);
    }

    #[test]
    fn test_timestamp_field() {
        assert_eq!(EntryStatus::Completed.timestamp_field(), "completed_at");
        assert_eq!(EntryStatus::Failed.timestamp_field(), "failed_at");
    }
}
