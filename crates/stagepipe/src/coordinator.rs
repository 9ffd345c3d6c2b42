//! Pipeline coordinator: wires the stores together and exposes the
//! read models and destructive commands consumed by external callers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::Settings;
use crate::datastore::DataStore;
use crate::db::{mapping_repo, Database};
use crate::error::Result;
use crate::mapping::{GenerateParams, MappingModel, MappingReconciler};
use crate::queue::{QueueLedger, QueueStatus};
use crate::stage::{Stage, StageStore};
use crate::sync::FileLockMap;
use crate::tasks::{SchedulerBackend, TaskGraph, TaskOverview};

/// Processing statistics for one tpa.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TpaStats {
    pub tpa: String,
    pub pending: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub total: u64,
    /// SUCCESS over all terminal entries; 0.0 when nothing finished yet.
    pub success_rate: f64,
}

/// Mapping progress for one target table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCompleteness {
    pub target_table: String,
    pub total: u64,
    pub approved: u64,
    pub pending: u64,
    pub duplicates: u64,
}

/// Outcome of the clear-all command. The underlying stores are
/// heterogeneous, so the result is per-subsystem rather than atomic.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearAllReport {
    pub stages_cleared: Vec<String>,
    pub tables_truncated: Vec<String>,
    pub errors: Vec<String>,
}

/// Composition root over the stage store, queue ledger, task graph and
/// mapping reconciler, sharing one database handle and one per-file lock
/// map so stage and queue mutations on the same file serialize.
pub struct PipelineCoordinator {
    settings: Settings,
    stages: StageStore,
    queue: Arc<QueueLedger>,
    tasks: Arc<TaskGraph>,
    mappings: MappingReconciler,
    data_store: Arc<dyn DataStore>,
    db: Database,
}

impl PipelineCoordinator {
    pub fn new(
        settings: Settings,
        model: Arc<dyn MappingModel>,
        scheduler: Arc<dyn SchedulerBackend>,
        data_store: Arc<dyn DataStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let db = Database::open(&settings.database_path)?;
        let locks = FileLockMap::new();

        let queue = Arc::new(QueueLedger::new(
            db.clone(),
            locks.clone(),
            data_store.clone(),
        ));
        // Stage deletions reconcile the queue record in the same operation.
        let stages = StageStore::new(&settings.data_dir, locks)?.with_sink(queue.clone());
        let tasks = Arc::new(TaskGraph::new(scheduler));
        let mappings = MappingReconciler::new(db.clone(), model);

        log::info!(
            "Pipeline coordinator ready (stages at {}, database at {})",
            settings.data_dir.display(),
            settings.database_path.display()
        );
        Ok(Self {
            settings,
            stages,
            queue,
            tasks,
            mappings,
            data_store,
            db,
        })
    }

    pub fn stages(&self) -> &StageStore {
        &self.stages
    }

    pub fn queue(&self) -> &QueueLedger {
        &self.queue
    }

    pub fn tasks(&self) -> &TaskGraph {
        &self.tasks
    }

    pub fn mappings(&self) -> &MappingReconciler {
        &self.mappings
    }

    /// Generation knobs derived from the settings file.
    pub fn generation_params(&self) -> GenerateParams {
        GenerateParams {
            min_confidence: self.settings.min_confidence,
            timeout: Duration::from_secs(self.settings.generation_timeout_secs),
            extra: serde_json::Value::Null,
        }
    }

    /// Per-tpa processing statistics, optionally restricted to one tpa.
    pub fn tpa_stats(&self, tpa: Option<&str>) -> Result<Vec<TpaStats>> {
        let counts = self.queue.status_counts(tpa)?;
        let mut by_tpa: BTreeMap<String, TpaStats> = BTreeMap::new();

        for (tpa, status, n) in counts {
            let stats = by_tpa.entry(tpa.clone()).or_insert_with(|| TpaStats {
                tpa,
                ..Default::default()
            });
            match status {
                QueueStatus::Pending => stats.pending += n,
                QueueStatus::Processing => stats.processing += n,
                QueueStatus::Success => stats.success += n,
                QueueStatus::Failed => stats.failed += n,
            }
            stats.total += n;
        }

        let mut stats: Vec<TpaStats> = by_tpa.into_values().collect();
        for s in &mut stats {
            let terminal = s.success + s.failed;
            if terminal > 0 {
                s.success_rate = s.success as f64 / terminal as f64;
            }
        }
        Ok(stats)
    }

    /// Per-target-table mapping progress for one tpa, duplicate counts
    /// included.
    pub fn mapping_completeness(&self, tpa: &str) -> Result<Vec<TableCompleteness>> {
        let counts = mapping_repo::completeness_counts(&self.db, tpa)?;
        let mut tables = Vec::with_capacity(counts.len());
        for (target_table, total, approved) in counts {
            let duplicates = self.mappings.list_duplicates(&target_table, tpa)?.len() as u64;
            tables.push(TableCompleteness {
                target_table,
                total,
                approved,
                pending: total - approved,
                duplicates,
            });
        }
        Ok(tables)
    }

    /// Task states grouped by layer with aggregate counts.
    pub fn task_health(&self) -> TaskOverview {
        self.tasks.list_all()
    }

    /// Resets queue entries stuck in PROCESSING past the configured age.
    pub fn reset_stuck_entries(&self) -> Result<u64> {
        let max_age = chrono::Duration::minutes(self.settings.stuck_entry_max_age_minutes as i64);
        Ok(self.queue.reset_stuck(max_age)?)
    }

    /// Wipes every stage, truncates the queue, and truncates the downstream
    /// data store. Failures are collected per subsystem; the command never
    /// stops at the first error because the stores share no transaction.
    pub fn clear_all_data(&self) -> ClearAllReport {
        let mut report = ClearAllReport {
            stages_cleared: Vec::new(),
            tables_truncated: Vec::new(),
            errors: Vec::new(),
        };

        for stage in Stage::ALL {
            match self.stages.wipe(stage) {
                Ok(_) => report.stages_cleared.push(stage.to_string()),
                Err(e) => report.errors.push(format!("stage {}: {}", stage, e)),
            }
        }

        match self.queue.truncate() {
            Ok(_) => report
                .tables_truncated
                .push("file_processing_queue".to_string()),
            Err(e) => report.errors.push(format!("queue: {}", e)),
        }

        match self.data_store.truncate_all() {
            Ok(tables) => report.tables_truncated.extend(tables),
            Err(e) => report.errors.push(format!("data store: {}", e)),
        }

        if report.errors.is_empty() {
            log::info!(
                "Cleared all data: {} stages, {} tables",
                report.stages_cleared.len(),
                report.tables_truncated.len()
            );
        } else {
            log::error!("Clear all data finished with errors: {:?}", report.errors);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::NullDataStore;
    use crate::mapping::FixedModel;
    use crate::tasks::NoopScheduler;
    use tempfile::TempDir;

    fn test_coordinator() -> (TempDir, PipelineCoordinator, Arc<NullDataStore>) {
        let dir = TempDir::new().unwrap();
        let settings = Settings {
            data_dir: dir.path().join("stages"),
            database_path: dir.path().join("stagepipe.db"),
            ..Default::default()
        };
        let data_store = Arc::new(NullDataStore::new());
        let coordinator = PipelineCoordinator::new(
            settings,
            Arc::new(FixedModel::default()),
            Arc::new(NoopScheduler),
            data_store.clone(),
        )
        .unwrap();
        (dir, coordinator, data_store)
    }

    fn run_file(c: &PipelineCoordinator, file: &str, tpa: &str, status: QueueStatus) {
        let entry = c.queue().enqueue(file, tpa, "CSV", None).unwrap();
        if status == QueueStatus::Pending {
            return;
        }
        c.queue().mark_processing(entry.queue_id).unwrap();
        if status != QueueStatus::Processing {
            c.queue().mark_result(entry.queue_id, status, "done").unwrap();
        }
    }

    #[test]
    fn test_tpa_stats() {
        let (_dir, c, _) = test_coordinator();
        run_file(&c, "a.csv", "provider_a", QueueStatus::Success);
        run_file(&c, "b.csv", "provider_a", QueueStatus::Success);
        run_file(&c, "c.csv", "provider_a", QueueStatus::Failed);
        run_file(&c, "d.csv", "provider_a", QueueStatus::Pending);
        run_file(&c, "e.csv", "provider_b", QueueStatus::Processing);

        let stats = c.tpa_stats(None).unwrap();
        assert_eq!(stats.len(), 2);

        let a = &stats[0];
        assert_eq!(a.tpa, "provider_a");
        assert_eq!((a.success, a.failed, a.pending, a.total), (2, 1, 1, 4));
        assert!((a.success_rate - 2.0 / 3.0).abs() < 1e-9);

        let b = &stats[1];
        assert_eq!(b.processing, 1);
        assert_eq!(b.success_rate, 0.0);

        let only_a = c.tpa_stats(Some("provider_a")).unwrap();
        assert_eq!(only_a.len(), 1);
    }

    #[test]
    fn test_mapping_completeness() {
        let (_dir, c, _) = test_coordinator();
        let m = c
            .mappings()
            .create_manual("RAW_DATA_TABLE", "memid", "DENTAL_CLAIMS", "MEMBER_ID", "provider_a", None)
            .unwrap();
        c.mappings()
            .create_manual("RAW_DATA_TABLE", "mem_id", "DENTAL_CLAIMS", "MEMBER_ID", "provider_a", None)
            .unwrap();
        c.mappings().approve(m.mapping_id).unwrap();

        let tables = c.mapping_completeness("provider_a").unwrap();
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.target_table, "DENTAL_CLAIMS");
        assert_eq!((t.total, t.approved, t.pending, t.duplicates), (2, 1, 1, 2));
    }

    #[test]
    fn test_stage_delete_reconciles_queue() {
        let (_dir, c, _) = test_coordinator();
        c.stages().put("provider_a", "claims.csv", b"data").unwrap();
        let entry = c.queue().enqueue("claims.csv", "provider_a", "CSV", None).unwrap();

        c.stages().delete(Stage::Src, "provider_a/claims.csv").unwrap();

        // The PENDING record went with the file.
        assert!(c.queue().get(entry.queue_id).is_err());
    }

    #[test]
    fn test_clear_all_data() {
        let (_dir, c, data_store) = test_coordinator();
        c.stages().put("provider_a", "a.csv", b"a").unwrap();
        run_file(&c, "a.csv", "provider_a", QueueStatus::Success);
        data_store.seed("a.csv", "provider_a", 10);

        let report = c.clear_all_data();
        assert_eq!(report.stages_cleared.len(), 5);
        assert!(report
            .tables_truncated
            .contains(&"file_processing_queue".to_string()));
        assert!(report.errors.is_empty());
        assert!(c.stages().list(Stage::Src).unwrap().is_empty());
        assert!(c.queue().list(&Default::default()).unwrap().is_empty());
        assert_eq!(data_store.row_count("a.csv", "provider_a"), 0);
    }

    #[test]
    fn test_generation_params_follow_settings() {
        let (_dir, c, _) = test_coordinator();
        let params = c.generation_params();
        assert_eq!(params.min_confidence, 0.5);
        assert_eq!(params.timeout, Duration::from_secs(120));
    }
}
