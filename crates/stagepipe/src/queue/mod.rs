//! File processing queue: the authoritative per-file processing record.

pub mod ledger;

pub use ledger::{DeleteFileDataReport, QueueFilter, QueueLedger};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Processing status of one queue entry.
///
/// The transition table is closed: `Pending → Processing → {Success, Failed}`
/// and `Failed → Pending` (reprocess only). Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "PENDING",
            QueueStatus::Processing => "PROCESSING",
            QueueStatus::Success => "SUCCESS",
            QueueStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(QueueStatus::Pending),
            "PROCESSING" => Some(QueueStatus::Processing),
            "SUCCESS" => Some(QueueStatus::Success),
            "FAILED" => Some(QueueStatus::Failed),
            _ => None,
        }
    }

    /// Whether a direct transition to `to` is allowed. Reprocess
    /// (`Failed → Pending`) is handled separately because it also mutates
    /// retry accounting.
    pub fn can_transition_to(&self, to: QueueStatus) -> bool {
        matches!(
            (self, to),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Success)
                | (QueueStatus::Processing, QueueStatus::Failed)
        )
    }

    /// True for PENDING and PROCESSING — the states that block a second
    /// enqueue of the same file.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file's processing record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub queue_id: i64,
    pub file_name: String,
    pub tpa: String,
    pub file_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    pub status: QueueStatus,
    pub discovered_timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: i64,
}
