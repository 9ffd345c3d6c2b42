//! End-to-end file lifecycle through the coordinator: upload, queue
//! transitions, stage moves, reconciliation on delete, and clear-all.

use std::sync::Arc;

use stagepipe::mapping::FixedModel;
use stagepipe::tasks::NoopScheduler;
use stagepipe::{
    NullDataStore, PipelineCoordinator, QueueError, QueueFilter, QueueStatus, Settings, Stage,
};
use tempfile::TempDir;

fn coordinator() -> (TempDir, PipelineCoordinator, Arc<NullDataStore>) {
    let dir = TempDir::new().unwrap();
    let settings = Settings {
        data_dir: dir.path().join("stages"),
        database_path: dir.path().join("stagepipe.db"),
        ..Default::default()
    };
    let data_store = Arc::new(NullDataStore::new());
    let c = PipelineCoordinator::new(
        settings,
        Arc::new(FixedModel::default()),
        Arc::new(NoopScheduler),
        data_store.clone(),
    )
    .unwrap();
    (dir, c, data_store)
}

#[test]
fn file_moves_through_pipeline_to_success() {
    let (_dir, c, data_store) = coordinator();

    // Upload lands in SRC.
    let file = c.stages().put("provider_a", "claims.csv", b"id,member\n1,x\n").unwrap();
    assert_eq!(file.stage, Stage::Src);

    // Discovery enqueues it.
    let entry = c
        .queue()
        .enqueue("claims.csv", "provider_a", "CSV", Some(file.size_bytes as i64))
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);

    // A processing run claims it and moves the physical file along.
    c.queue().mark_processing(entry.queue_id).unwrap();
    c.stages()
        .move_file("provider_a/claims.csv", Stage::Src, Stage::Processing)
        .unwrap();

    // Run finishes: rows loaded, file parked in COMPLETED.
    data_store.seed("claims.csv", "provider_a", 1);
    c.queue()
        .mark_result(entry.queue_id, QueueStatus::Success, "1 row loaded")
        .unwrap();
    c.stages()
        .move_file("provider_a/claims.csv", Stage::Processing, Stage::Completed)
        .unwrap();

    assert_eq!(c.stages().find("provider_a/claims.csv"), Some(Stage::Completed));
    let entry = c.queue().get(entry.queue_id).unwrap();
    assert_eq!(entry.status, QueueStatus::Success);
    assert_eq!(entry.process_result.as_deref(), Some("1 row loaded"));

    // Downstream purge is its own explicit command and keeps the entry.
    let report = c.queue().delete_file_data("claims.csv", "provider_a").unwrap();
    assert_eq!(report.rows_deleted, 1);
    assert_eq!(c.queue().get(entry.queue_id).unwrap().status, QueueStatus::Success);
}

#[test]
fn duplicate_enqueue_while_pending_is_rejected() {
    let (_dir, c, _) = coordinator();
    c.queue().enqueue("claims.csv", "provider_a", "CSV", None).unwrap();

    let result = c.queue().enqueue("claims.csv", "provider_a", "CSV", None);
    assert!(matches!(result, Err(QueueError::DuplicateActive { .. })));
}

#[test]
fn reprocess_failed_file() {
    let (_dir, c, _) = coordinator();
    let entry = c.queue().enqueue("claims.csv", "provider_a", "CSV", None).unwrap();
    c.queue().mark_processing(entry.queue_id).unwrap();
    c.queue()
        .mark_result(entry.queue_id, QueueStatus::Failed, "bad header")
        .unwrap();

    let entry = c.queue().reprocess(entry.queue_id).unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.retry_count, 1);
    assert!(entry.error_message.is_none());

    // A SUCCESS entry cannot be reprocessed.
    c.queue().mark_processing(entry.queue_id).unwrap();
    c.queue()
        .mark_result(entry.queue_id, QueueStatus::Success, "ok")
        .unwrap();
    assert!(matches!(
        c.queue().reprocess(entry.queue_id),
        Err(QueueError::InvalidState { .. })
    ));
}

#[test]
fn stage_delete_keeps_queue_consistent() {
    let (_dir, c, _) = coordinator();

    // A PENDING entry disappears with its file.
    c.stages().put("provider_a", "fresh.csv", b"x").unwrap();
    let fresh = c.queue().enqueue("fresh.csv", "provider_a", "CSV", None).unwrap();
    c.stages().delete(Stage::Src, "provider_a/fresh.csv").unwrap();
    assert!(c.queue().get(fresh.queue_id).is_err());

    // A SUCCESS entry survives, annotated.
    c.stages().put("provider_a", "done.csv", b"x").unwrap();
    let done = c.queue().enqueue("done.csv", "provider_a", "CSV", None).unwrap();
    c.queue().mark_processing(done.queue_id).unwrap();
    c.queue()
        .mark_result(done.queue_id, QueueStatus::Success, "loaded")
        .unwrap();
    c.stages().delete(Stage::Src, "provider_a/done.csv").unwrap();

    let entry = c.queue().get(done.queue_id).unwrap();
    assert_eq!(entry.status, QueueStatus::Success);
    assert_eq!(
        entry.error_message.as_deref(),
        Some("source file deleted from stage")
    );
}

#[test]
fn bulk_delete_reports_per_item_and_reconciles() {
    let (_dir, c, _) = coordinator();
    c.stages().put("provider_a", "a.csv", b"a").unwrap();
    c.stages().put("provider_a", "b.csv", b"b").unwrap();
    c.queue().enqueue("a.csv", "provider_a", "CSV", None).unwrap();
    c.queue().enqueue("b.csv", "provider_a", "CSV", None).unwrap();

    let report = c.stages().bulk_delete(
        Stage::Src,
        &[
            "provider_a/a.csv".to_string(),
            "provider_a/ghost.csv".to_string(),
            "provider_a/b.csv".to_string(),
        ],
    );

    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, "provider_a/ghost.csv");

    // Both PENDING entries went with their files.
    assert!(c.queue().list(&QueueFilter::default()).unwrap().is_empty());
}

#[test]
fn clear_all_data_sequences_every_store() {
    let (_dir, c, data_store) = coordinator();
    c.stages().put("provider_a", "a.csv", b"a").unwrap();
    c.queue().enqueue("a.csv", "provider_a", "CSV", None).unwrap();
    data_store.seed("a.csv", "provider_a", 50);

    let report = c.clear_all_data();
    assert_eq!(report.stages_cleared.len(), 5);
    assert_eq!(
        report.tables_truncated,
        vec!["file_processing_queue".to_string(), "RAW_DATA_TABLE".to_string()]
    );
    assert!(report.errors.is_empty());

    assert!(c.stages().list(Stage::Src).unwrap().is_empty());
    assert!(c.queue().list(&QueueFilter::default()).unwrap().is_empty());
    assert_eq!(data_store.row_count("a.csv", "provider_a"), 0);
}

#[test]
fn tpa_stats_reflect_queue_history() {
    let (_dir, c, _) = coordinator();
    for (file, status) in [
        ("a.csv", QueueStatus::Success),
        ("b.csv", QueueStatus::Success),
        ("c.csv", QueueStatus::Failed),
    ] {
        let entry = c.queue().enqueue(file, "provider_a", "CSV", None).unwrap();
        c.queue().mark_processing(entry.queue_id).unwrap();
        c.queue().mark_result(entry.queue_id, status, "done").unwrap();
    }

    let stats = c.tpa_stats(Some("provider_a")).unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].success, 2);
    assert_eq!(stats[0].failed, 1);
    assert!((stats[0].success_rate - 2.0 / 3.0).abs() < 1e-9);
}
