//! Pipeline stage names and their static properties.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of the call processing pipeline.
///
/// Variants are declared in pipeline order, so the derived `Ord` sorts
/// stages the way they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Extraction of call ids (and recording metadata) from the vendor.
    GetCallIds,
    /// Download of the call recording.
    DownloadAudio,
    /// Speech-to-text transcription of the recording.
    Transcribe,
    /// Upload of the recording to the storage service.
    UploadAudio,
    /// Analysis of the transcribed and uploaded call.
    Analyze,
}

impl StageName {
    /// All stages in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::GetCallIds,
        Self::DownloadAudio,
        Self::Transcribe,
        Self::UploadAudio,
        Self::Analyze,
    ];

    /// Returns the snake_case name used in the ledger file.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::GetCallIds => "get_call_ids",
            Self::DownloadAudio => "download_audio",
            Self::Transcribe => "transcribe",
            Self::UploadAudio => "upload_audio",
            Self::Analyze => "analyze",
        }
    }

    /// Name of the JSON object holding this stage's entries.
    #[must_use]
    pub const fn ledger_field(&self) -> &'static str {
        match self {
            Self::GetCallIds => "extracted_calls",
            Self::DownloadAudio => "downloaded_files",
            Self::Transcribe => "transcribed_files",
            Self::UploadAudio => "uploaded_files",
            Self::Analyze => "analyzed_calls",
        }
    }

    /// Name of the completed counter field.
    #[must_use]
    pub const fn counter_field(&self) -> &'static str {
        match self {
            Self::GetCallIds => "total_calls_extracted",
            Self::DownloadAudio => "total_downloaded",
            Self::Transcribe => "total_transcribed",
            Self::UploadAudio => "total_uploaded",
            Self::Analyze => "total_analyzed",
        }
    }

    /// Name of the separate failure map written by older ledger files.
    #[must_use]
    pub const fn legacy_failed_field(&self) -> Option<&'static str> {
        match self {
            Self::GetCallIds => None,
            Self::DownloadAudio => Some("failed_downloads"),
            Self::Transcribe => Some("failed_transcriptions"),
            Self::UploadAudio => Some("failed_uploads"),
            Self::Analyze => Some("failed_analyses"),
        }
    }

    /// Attribute keys that must be present when marking an item completed.
    #[must_use]
    pub const fn required_attributes(&self) -> &'static [&'static str] {
        match self {
            Self::GetCallIds | Self::Analyze => &[],
            Self::DownloadAudio => &["filename", "filepath"],
            Self::Transcribe => &["transcript_path"],
            Self::UploadAudio => &["file_url"],
        }
    }

    /// Stages an item must have completed before it is eligible here.
    ///
    /// More than one prerequisite is a join: every one must be completed.
    #[must_use]
    pub const fn prerequisites(&self) -> &'static [Self] {
        match self {
            Self::GetCallIds => &[],
            Self::DownloadAudio => &[Self::GetCallIds],
            Self::Transcribe | Self::UploadAudio => &[Self::DownloadAudio],
            Self::Analyze => &[Self::Transcribe, Self::UploadAudio],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown stage: {0}")]
pub struct UnknownStageError(pub String);

impl FromStr for StageName {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStageError(s.to_string()))
    }
}
