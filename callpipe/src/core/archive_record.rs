//! Archive categories and records.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::Timestamp;

/// Kind of artifact being archived; also the archive subdirectory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveCategory {
    /// Extracted call id spreadsheets.
    CallIds,
    /// Downloaded recordings.
    Audio,
    /// Transcript files.
    Transcripts,
    /// Artifacts set aside after a failure.
    Failed,
}

impl ArchiveCategory {
    /// All categories.
    pub const ALL: [Self; 4] = [Self::CallIds, Self::Audio, Self::Transcripts, Self::Failed];

    /// Returns the directory and ledger name of the category.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CallIds => "call_ids",
            Self::Audio => "audio",
            Self::Transcripts => "transcripts",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ArchiveCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown archive category: {0}")]
pub struct UnknownCategoryError(pub String);

impl FromStr for ArchiveCategory {
    type Err = UnknownCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| UnknownCategoryError(s.to_string()))
    }
}

/// One successfully archived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    /// The item the file belongs to, when known.
    #[serde(rename = "call_id", default)]
    pub item_id: Option<String>,
    /// File name the artifact had in the working directory.
    pub original_filename: String,
    /// Where the file now lives.
    pub archive_path: String,
    /// When the move happened.
    #[serde(with = "crate::utils::timestamps::serde_iso")]
    pub archived_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::parse_timestamp;
    use serde_json::json;

    #[test]
    fn test_category_display_and_parse() {
        for category in ArchiveCategory::ALL {
            assert_eq!(category.to_string().parse::<ArchiveCategory>(), Ok(category));
        }
        assert!("videos".parse::<ArchiveCategory>().is_err());
    }

    #[test]
    fn test_record_serializes_item_as_call_id() {
        let record = ArchiveRecord {
            item_id: Some("C1".to_string()),
            original_filename: "b1_C1.wav".to_string(),
            archive_path: "archive/audio/2024-05-01/b1_C1.wav".to_string(),
            archived_at: parse_timestamp("2024-05-01T10:00:00Z").unwrap(),
        };

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "call_id": "C1",
                "original_filename": "b1_C1.wav",
                "archive_path": "archive/audio/2024-05-01/b1_C1.wav",
                "archived_at": "2024-05-01T10:00:00.000000+00:00",
            })
        );
    }

    #[test]
    fn test_record_accepts_null_call_id() {
        let record: ArchiveRecord = serde_json::from_value(json!({
            "call_id": null,
            "original_filename": "calls_2024-05.xlsx",
            "archive_path": "archive/call_ids/2024-05-01/calls_2024-05.xlsx",
            "archived_at": "2024-05-01T10:00:00.250000",
        }))
        .unwrap();

        assert_eq!(record.item_id, None);
        assert_eq!(record.original_filename, "calls_2024-05.xlsx");
    }
}
