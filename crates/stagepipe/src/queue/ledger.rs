//! Queue ledger: enforces the per-file processing state machine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::{QueueEntry, QueueStatus};
use crate::datastore::DataStore;
use crate::db::queue_repo::{self, QueueRow, QueueRowFilter};
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;
use crate::stage::{StageEvent, StageEventSink};
use crate::sync::FileLockMap;

/// Error text recorded when a staged file is deleted out from under a
/// PROCESSING or SUCCESS entry.
const STAGE_DELETE_NOTE: &str = "source file deleted from stage";

/// Query filter for queue listing. Values within one field are OR-ed,
/// fields are AND-ed; an empty filter lists everything.
#[derive(Debug, Default, Clone)]
pub struct QueueFilter {
    pub status: Vec<QueueStatus>,
    pub file_type: Vec<String>,
    pub tpa: Vec<String>,
}

/// Outcome of a `delete_file_data` call. The queue entry itself is kept
/// for audit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileDataReport {
    pub file_name: String,
    pub tpa: String,
    pub rows_deleted: u64,
}

/// The authoritative processing record per file.
///
/// Transitions are serialized per file key with the `FileLockMap` shared
/// with the stage store, so a reprocess cannot race a concurrent stage
/// mutation on the same file.
#[derive(Clone)]
pub struct QueueLedger {
    db: Database,
    locks: FileLockMap,
    data_store: Arc<dyn DataStore>,
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            QueueError::Database(DatabaseError::CorruptValue {
                column,
                value: value.to_string(),
            })
        })
}

fn entry_from_row(row: QueueRow) -> Result<QueueEntry, QueueError> {
    let status = QueueStatus::parse(&row.status).ok_or_else(|| {
        QueueError::Database(DatabaseError::CorruptValue {
            column: "status",
            value: row.status.clone(),
        })
    })?;
    let discovered = parse_timestamp("discovered_timestamp", &row.discovered_timestamp)?;
    let processed = match &row.processed_timestamp {
        Some(ts) => Some(parse_timestamp("processed_timestamp", ts)?),
        None => None,
    };

    Ok(QueueEntry {
        queue_id: row.queue_id,
        file_name: row.file_name,
        tpa: row.tpa,
        file_type: row.file_type,
        file_size_bytes: row.file_size_bytes,
        status,
        discovered_timestamp: discovered,
        processed_timestamp: processed,
        process_result: row.process_result,
        error_message: row.error_message,
        retry_count: row.retry_count,
    })
}

impl QueueLedger {
    pub fn new(db: Database, locks: FileLockMap, data_store: Arc<dyn DataStore>) -> Self {
        Self {
            db,
            locks,
            data_store,
        }
    }

    /// Records a newly discovered file with status PENDING.
    ///
    /// Fails with `DuplicateActive` when the same file already has a PENDING
    /// or PROCESSING entry — the guard against double-processing races.
    pub fn enqueue(
        &self,
        file_name: &str,
        tpa: &str,
        file_type: &str,
        file_size_bytes: Option<i64>,
    ) -> Result<QueueEntry, QueueError> {
        let key = FileLockMap::key(tpa, file_name);
        self.locks.with_lock(&key, || {
            if let Some(active) = queue_repo::find_for_file_with_status(
                &self.db,
                file_name,
                tpa,
                &["PENDING", "PROCESSING"],
            )? {
                return Err(QueueError::DuplicateActive {
                    file_name: file_name.to_string(),
                    tpa: tpa.to_string(),
                    status: active.status,
                });
            }

            let queue_id = queue_repo::insert(
                &self.db,
                file_name,
                tpa,
                file_type,
                file_size_bytes,
                QueueStatus::Pending.as_str(),
                &now_str(),
            )?;
            log::info!(
                "Enqueued {} for tpa {} (queue_id={})",
                file_name,
                tpa,
                queue_id
            );
            self.get(queue_id)
        })
    }

    /// Returns one entry by id.
    pub fn get(&self, queue_id: i64) -> Result<QueueEntry, QueueError> {
        let row = queue_repo::find_by_id(&self.db, queue_id)?
            .ok_or(QueueError::NotFound { queue_id })?;
        entry_from_row(row)
    }

    /// PENDING → PROCESSING. Any other current status fails with
    /// `InvalidTransition`.
    pub fn mark_processing(&self, queue_id: i64) -> Result<QueueEntry, QueueError> {
        self.transition(queue_id, QueueStatus::Processing, None)
    }

    /// PROCESSING → SUCCESS or FAILED, recording the result or error text.
    /// Any other requested status or current status fails with
    /// `InvalidTransition`.
    pub fn mark_result(
        &self,
        queue_id: i64,
        status: QueueStatus,
        result_or_error: &str,
    ) -> Result<QueueEntry, QueueError> {
        if !matches!(status, QueueStatus::Success | QueueStatus::Failed) {
            let current = self.get(queue_id)?;
            return Err(QueueError::InvalidTransition {
                queue_id,
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }
        self.transition(queue_id, status, Some(result_or_error))
    }

    fn transition(
        &self,
        queue_id: i64,
        to: QueueStatus,
        result_or_error: Option<&str>,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.get(queue_id)?;
        let key = FileLockMap::key(&entry.tpa, &entry.file_name);

        self.locks.with_lock(&key, || {
            // Re-read under the lock; a concurrent transition may have won.
            let entry = self.get(queue_id)?;
            if !entry.status.can_transition_to(to) {
                return Err(QueueError::InvalidTransition {
                    queue_id,
                    from: entry.status.to_string(),
                    to: to.to_string(),
                });
            }

            let (result, error) = match (to, result_or_error) {
                (QueueStatus::Success, Some(text)) => (Some(text), None),
                (QueueStatus::Failed, Some(text)) => (None, Some(text)),
                _ => (entry.process_result.as_deref(), entry.error_message.as_deref()),
            };
            let processed = match to {
                QueueStatus::Success | QueueStatus::Failed => Some(now_str()),
                _ => entry
                    .processed_timestamp
                    .map(|ts| ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
            };

            queue_repo::update_result(
                &self.db,
                queue_id,
                to.as_str(),
                processed.as_deref(),
                result,
                error,
                entry.retry_count,
            )?;
            log::info!(
                "Queue entry {} transitioned {} -> {}",
                queue_id,
                entry.status,
                to
            );
            self.get(queue_id)
        })
    }

    /// Resets a FAILED entry to PENDING for another attempt: increments
    /// retry_count and clears the error text and result fields. Any other
    /// current status fails with `InvalidState`.
    pub fn reprocess(&self, queue_id: i64) -> Result<QueueEntry, QueueError> {
        let entry = self.get(queue_id)?;
        let key = FileLockMap::key(&entry.tpa, &entry.file_name);

        self.locks.with_lock(&key, || {
            let entry = self.get(queue_id)?;
            if entry.status != QueueStatus::Failed {
                return Err(QueueError::InvalidState {
                    queue_id,
                    status: entry.status.to_string(),
                    reason: "only FAILED entries can be reprocessed".to_string(),
                });
            }

            queue_repo::update_result(
                &self.db,
                queue_id,
                QueueStatus::Pending.as_str(),
                None,
                None,
                None,
                entry.retry_count + 1,
            )?;
            log::info!(
                "Queue entry {} reset to PENDING for reprocessing (retry {})",
                queue_id,
                entry.retry_count + 1
            );
            self.get(queue_id)
        })
    }

    /// Purges the downstream rows derived from one file. Valid only when the
    /// file's most recent entry is SUCCESS; the entry itself is kept as the
    /// audit record.
    pub fn delete_file_data(
        &self,
        file_name: &str,
        tpa: &str,
    ) -> Result<DeleteFileDataReport, QueueError> {
        let row = queue_repo::find_latest_for_file(&self.db, file_name, tpa)?.ok_or_else(|| {
            QueueError::FileNotFound {
                file_name: file_name.to_string(),
                tpa: tpa.to_string(),
            }
        })?;
        let entry = entry_from_row(row)?;
        if entry.status != QueueStatus::Success {
            return Err(QueueError::InvalidState {
                queue_id: entry.queue_id,
                status: entry.status.to_string(),
                reason: "file data can only be deleted after a SUCCESS run".to_string(),
            });
        }

        let rows_deleted = self
            .data_store
            .delete_file_rows(file_name, tpa)
            .map_err(|e| QueueError::External(e.to_string()))?;

        log::info!(
            "Deleted {} derived rows for {} (tpa {})",
            rows_deleted,
            file_name,
            tpa
        );
        Ok(DeleteFileDataReport {
            file_name: file_name.to_string(),
            tpa: tpa.to_string(),
            rows_deleted,
        })
    }

    /// Lists entries matching the filter, newest first.
    pub fn list(&self, filter: &QueueFilter) -> Result<Vec<QueueEntry>, QueueError> {
        let row_filter = QueueRowFilter {
            status: filter.status.iter().map(|s| s.as_str().to_string()).collect(),
            file_type: filter.file_type.clone(),
            tpa: filter.tpa.clone(),
        };
        queue_repo::query(&self.db, &row_filter)?
            .into_iter()
            .map(entry_from_row)
            .collect()
    }

    /// Resets entries stuck in PROCESSING for longer than `max_age` back to
    /// PENDING. Returns the number of entries reset.
    pub fn reset_stuck(&self, max_age: Duration) -> Result<u64, QueueError> {
        let cutoff = (Utc::now() - max_age)
            .format("%Y-%m-%dT%H:%M:%S%.6fZ")
            .to_string();
        let n = queue_repo::reset_stuck(&self.db, &cutoff, "Reset from stuck PROCESSING status")?;
        if n > 0 {
            log::warn!("Reset {} stuck entries to PENDING", n);
        }
        Ok(n)
    }

    /// Removes every entry. Used by the clear-all command; returns rows
    /// removed.
    pub fn truncate(&self) -> Result<u64, QueueError> {
        Ok(queue_repo::truncate(&self.db)?)
    }

    /// Per-(tpa, status) entry counts, optionally restricted to one tpa.
    pub fn status_counts(
        &self,
        tpa: Option<&str>,
    ) -> Result<Vec<(String, QueueStatus, u64)>, QueueError> {
        let raw = queue_repo::status_counts(&self.db, tpa)?;
        let mut counts = Vec::with_capacity(raw.len());
        for (tpa, status, n) in raw {
            let status = QueueStatus::parse(&status).ok_or({
                QueueError::Database(DatabaseError::CorruptValue {
                    column: "status",
                    value: status.clone(),
                })
            })?;
            counts.push((tpa, status, n));
        }
        Ok(counts)
    }

    fn reconcile_removed_file(&self, tpa: &str, file_name: &str) {
        let key = FileLockMap::key(tpa, file_name);
        let result = self.locks.with_lock(&key, || -> Result<(), QueueError> {
            let Some(row) = queue_repo::find_latest_for_file(&self.db, file_name, tpa)? else {
                return Ok(());
            };
            let entry = entry_from_row(row)?;

            match entry.status {
                // Never-processed entries go with the file.
                QueueStatus::Pending | QueueStatus::Failed => {
                    queue_repo::delete_by_id(&self.db, entry.queue_id)?;
                    log::info!(
                        "Deleted queue entry {} for removed stage file {}",
                        entry.queue_id,
                        file_name
                    );
                }
                // Entries with a run behind them stay for audit, annotated.
                QueueStatus::Processing | QueueStatus::Success => {
                    queue_repo::update_result(
                        &self.db,
                        entry.queue_id,
                        entry.status.as_str(),
                        Some(&now_str()),
                        entry.process_result.as_deref(),
                        Some(STAGE_DELETE_NOTE),
                        entry.retry_count,
                    )?;
                    log::info!(
                        "Annotated queue entry {} after stage delete of {}",
                        entry.queue_id,
                        file_name
                    );
                }
            }
            Ok(())
        });

        if let Err(e) = result {
            log::error!(
                "Failed to reconcile queue entry for deleted stage file {}: {}",
                file_name,
                e
            );
        }
    }
}

impl StageEventSink for QueueLedger {
    fn on_stage_event(&self, event: &StageEvent) {
        let StageEvent::Removed {
            tpa, file_name, ..
        } = event;
        self.reconcile_removed_file(tpa, file_name);
    }
}
