//! Mapping reconciler: persists mappings, runs candidate generation against
//! the external model, and drives the approval workflow.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::Serialize;
use uuid::Uuid;

use super::duplicates;
use super::model::{MappingModel, SuggestionRequest};
use super::{FieldMapping, MappingMethod};
use crate::db::mapping_repo::{self, MappingRow, NewMappingRow};
use crate::db::{Database, DatabaseError};
use crate::error::MappingError;

/// Knobs for one generation run.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    /// Suggestions scoring below this are discarded.
    pub min_confidence: f64,
    /// Upper bound on the model call. On timeout no candidate rows are
    /// written at all.
    pub timeout: Duration,
    /// Free-form parameters forwarded to the model unchanged.
    pub extra: serde_json::Value,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            timeout: Duration::from_secs(120),
            extra: serde_json::Value::Null,
        }
    }
}

/// Outcome of a generation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateReport {
    /// Correlates the report with the log lines of one generation run.
    pub batch_id: Uuid,
    pub mappings_created: usize,
    pub message: String,
}

/// Per-item outcome of a bulk approve or delete. Item order matches the
/// input order regardless of which items failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMappingReport {
    pub succeeded: Vec<i64>,
    pub failed: Vec<FailedMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMapping {
    pub mapping_id: i64,
    pub reason: String,
}

/// Holds candidate and approved field correspondences and keeps them
/// consistent: duplicate flags are derived on read, approval is one-way,
/// and a generation batch lands atomically or not at all.
#[derive(Clone)]
pub struct MappingReconciler {
    db: Database,
    model: Arc<dyn MappingModel>,
}

fn now_str() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn mapping_from_row(row: MappingRow) -> Result<FieldMapping, MappingError> {
    let method = MappingMethod::parse(&row.mapping_method).ok_or_else(|| {
        MappingError::Database(DatabaseError::CorruptValue {
            column: "mapping_method",
            value: row.mapping_method.clone(),
        })
    })?;

    Ok(FieldMapping {
        mapping_id: row.mapping_id,
        source_table: row.source_table,
        source_field: row.source_field,
        target_table: row.target_table,
        target_column: row.target_column,
        tpa: row.tpa,
        method,
        confidence: row.confidence_score,
        approved: row.approved,
        transformation_logic: row.transformation_logic,
        duplicate: false,
    })
}

impl MappingReconciler {
    pub fn new(db: Database, model: Arc<dyn MappingModel>) -> Self {
        Self { db, model }
    }

    /// Creates one hand-authored mapping, unapproved.
    pub fn create_manual(
        &self,
        source_table: &str,
        source_field: &str,
        target_table: &str,
        target_column: &str,
        tpa: &str,
        transformation_logic: Option<&str>,
    ) -> Result<FieldMapping, MappingError> {
        let new = NewMappingRow {
            source_table: source_table.to_string(),
            source_field: source_field.to_string(),
            target_table: target_table.to_string(),
            target_column: target_column.to_string(),
            tpa: tpa.to_string(),
            mapping_method: MappingMethod::Manual.as_str().to_string(),
            confidence_score: None,
            approved: false,
            transformation_logic: transformation_logic.map(str::to_string),
        };
        let id = mapping_repo::insert(&self.db, &new, &now_str())?;
        log::info!(
            "Created manual mapping {} -> {}.{} (tpa {})",
            source_field,
            target_table,
            target_column,
            tpa
        );
        self.get(id)
    }

    /// Runs the model and persists every suggestion at or above the
    /// confidence floor, all unapproved, in one transaction.
    ///
    /// Fails fast with `NoSourceData` when the tpa has no raw fields, so a
    /// misconfigured tenant never burns an inference call. On timeout the
    /// model thread is abandoned and nothing is written.
    pub fn generate_candidates(
        &self,
        method: MappingMethod,
        source_table: &str,
        target_table: &str,
        tpa: &str,
        params: GenerateParams,
    ) -> Result<GenerateReport, MappingError> {
        if !method.is_generated() {
            return Err(MappingError::InvalidMethod {
                method: method.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&params.min_confidence) {
            return Err(MappingError::InvalidConfidence {
                value: params.min_confidence,
            });
        }

        let fields = self
            .model
            .source_fields(source_table, tpa)
            .map_err(MappingError::External)?;
        if fields.is_empty() {
            return Err(MappingError::NoSourceData {
                source_table: source_table.to_string(),
                tpa: tpa.to_string(),
            });
        }

        let batch_id = Uuid::new_v4();
        log::info!(
            "Generation batch {}: {} against {} fields of {} (tpa {})",
            batch_id,
            method,
            fields.len(),
            source_table,
            tpa
        );

        let request = SuggestionRequest {
            method,
            source_table: source_table.to_string(),
            target_table: target_table.to_string(),
            tpa: tpa.to_string(),
            params: params.extra.clone(),
        };

        // The model call may block for a long time; run it on its own
        // thread so the timeout can abandon it without tearing anything
        // down. Rows are only written after a reply arrives, which keeps a
        // timed-out batch fully absent.
        let (tx, rx) = bounded(1);
        let model = Arc::clone(&self.model);
        thread::spawn(move || {
            let result = model.suggest(&request);
            let _ = tx.send(result);
        });

        let suggestions = match rx.recv_timeout(params.timeout) {
            Ok(Ok(suggestions)) => suggestions,
            Ok(Err(msg)) => return Err(MappingError::External(msg)),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "Model call for {} (tpa {}) timed out after {}s",
                    target_table,
                    tpa,
                    params.timeout.as_secs()
                );
                return Err(MappingError::Timeout {
                    timeout_secs: params.timeout.as_secs(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(MappingError::External(
                    "model worker exited without replying".to_string(),
                ));
            }
        };

        let mut rows = Vec::new();
        for s in &suggestions {
            if !(0.0..=1.0).contains(&s.confidence) {
                return Err(MappingError::InvalidConfidence { value: s.confidence });
            }
            if s.confidence < params.min_confidence {
                continue;
            }
            rows.push(NewMappingRow {
                source_table: source_table.to_string(),
                source_field: s.source_field.clone(),
                target_table: target_table.to_string(),
                target_column: s.target_column.clone(),
                tpa: tpa.to_string(),
                mapping_method: method.as_str().to_string(),
                confidence_score: Some(s.confidence),
                approved: false,
                transformation_logic: None,
            });
        }

        let created = mapping_repo::insert_batch(&self.db, &rows, &now_str())?.len();
        log::info!(
            "Generation batch {}: created {} candidate mappings for {} ({} suggested)",
            batch_id,
            created,
            target_table,
            suggestions.len()
        );
        Ok(GenerateReport {
            batch_id,
            mappings_created: created,
            message: format!(
                "{} of {} suggestions met the {:.2} confidence floor",
                created,
                suggestions.len(),
                params.min_confidence
            ),
        })
    }

    /// Returns one mapping (duplicate flag derived against its scope).
    pub fn get(&self, mapping_id: i64) -> Result<FieldMapping, MappingError> {
        let row = mapping_repo::find_by_id(&self.db, mapping_id)?
            .ok_or(MappingError::NotFound { mapping_id })?;
        let mut mapping = mapping_from_row(row)?;

        let scope = self.list(&mapping.tpa.clone(), Some(&mapping.target_table.clone()))?;
        mapping.duplicate = scope
            .iter()
            .any(|m| m.mapping_id == mapping_id && m.duplicate);
        Ok(mapping)
    }

    /// Marks a mapping approved. Idempotent: approving an already-approved
    /// mapping succeeds unchanged, which makes bulk approval retry-safe.
    pub fn approve(&self, mapping_id: i64) -> Result<FieldMapping, MappingError> {
        let row = mapping_repo::find_by_id(&self.db, mapping_id)?
            .ok_or(MappingError::NotFound { mapping_id })?;
        if !row.approved {
            mapping_repo::set_approved(&self.db, mapping_id, true, &now_str())?;
            log::info!("Approved mapping {}", mapping_id);
        }
        self.get(mapping_id)
    }

    /// Removes a mapping regardless of approval state.
    pub fn delete(&self, mapping_id: i64) -> Result<(), MappingError> {
        if !mapping_repo::delete_by_id(&self.db, mapping_id)? {
            return Err(MappingError::NotFound { mapping_id });
        }
        log::info!("Deleted mapping {}", mapping_id);
        Ok(())
    }

    /// Rejects a candidate. Same effect as `delete`; the distinct name
    /// keeps the review workflow readable at call sites.
    pub fn decline(&self, mapping_id: i64) -> Result<(), MappingError> {
        self.delete(mapping_id)
    }

    /// Lists mappings for one tpa (optionally one target table) with
    /// duplicate flags derived from the current set.
    pub fn list(
        &self,
        tpa: &str,
        target_table: Option<&str>,
    ) -> Result<Vec<FieldMapping>, MappingError> {
        let rows = mapping_repo::list_scope(&self.db, tpa, target_table)?;
        let mut mappings = rows
            .into_iter()
            .map(mapping_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let flagged = duplicates::duplicate_ids(&mappings);
        for m in &mut mappings {
            m.duplicate = flagged.contains(&m.mapping_id);
        }
        Ok(mappings)
    }

    /// Ids of conflicting mappings within one `(target_table, tpa)` scope.
    pub fn list_duplicates(
        &self,
        target_table: &str,
        tpa: &str,
    ) -> Result<std::collections::BTreeSet<i64>, MappingError> {
        let rows = mapping_repo::list_scope(&self.db, tpa, Some(target_table))?;
        let mappings = rows
            .into_iter()
            .map(mapping_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(duplicates::duplicate_ids(&mappings))
    }

    /// Approves each id independently; one failure never aborts the rest.
    pub fn bulk_approve(&self, mapping_ids: &[i64]) -> BulkMappingReport {
        self.bulk(mapping_ids, |id| self.approve(id).map(|_| ()))
    }

    /// Deletes each id independently; one failure never aborts the rest.
    pub fn bulk_delete(&self, mapping_ids: &[i64]) -> BulkMappingReport {
        self.bulk(mapping_ids, |id| self.delete(id))
    }

    fn bulk<F>(&self, mapping_ids: &[i64], op: F) -> BulkMappingReport
    where
        F: Fn(i64) -> Result<(), MappingError>,
    {
        let mut report = BulkMappingReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        for &id in mapping_ids {
            match op(id) {
                Ok(()) => report.succeeded.push(id),
                Err(e) => report.failed.push(FailedMapping {
                    mapping_id: id,
                    reason: e.to_string(),
                }),
            }
        }
        report
    }
}
