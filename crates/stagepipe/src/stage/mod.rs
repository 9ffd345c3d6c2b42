//! Staged file locations.
//!
//! A file moves through five mutually exclusive stages as the pipeline runs:
//! it lands in SRC on upload, PROCESSING while a run owns it, then COMPLETED
//! on success or ERROR on failure, and finally ARCHIVE for retention.

pub mod store;

pub use store::{BulkDeleteReport, StageStore};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One of the five stage locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Src,
    Processing,
    Completed,
    Error,
    Archive,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Src,
        Stage::Processing,
        Stage::Completed,
        Stage::Error,
        Stage::Archive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Src => "SRC",
            Stage::Processing => "PROCESSING",
            Stage::Completed => "COMPLETED",
            Stage::Error => "ERROR",
            Stage::Archive => "ARCHIVE",
        }
    }

    /// Directory name under the stage root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Src => "src",
            Stage::Processing => "processing",
            Stage::Completed => "completed",
            Stage::Error => "error",
            Stage::Archive => "archive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SRC" => Some(Stage::Src),
            "PROCESSING" => Some(Stage::Processing),
            "COMPLETED" => Some(Stage::Completed),
            "ERROR" => Some(Stage::Error),
            "ARCHIVE" => Some(Stage::Archive),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file record within one stage. The relative path is `tpa/file_name`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageFile {
    pub stage: Stage,
    pub path: String,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the file content.
    pub digest: String,
    pub last_modified: DateTime<Utc>,
}

impl StageFile {
    /// The tpa segment of the relative path, when present.
    pub fn tpa(&self) -> Option<&str> {
        self.path.split_once('/').map(|(tpa, _)| tpa)
    }

    /// The bare file name (last path segment).
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Stage mutation notifications consumed by the queue ledger.
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A file was removed from a stage by an explicit delete.
    Removed {
        stage: Stage,
        tpa: String,
        file_name: String,
    },
}

/// Consumer of stage events. The queue ledger implements this to keep its
/// records consistent with the physical stage contents.
pub trait StageEventSink: Send + Sync {
    fn on_stage_event(&self, event: &StageEvent);
}
