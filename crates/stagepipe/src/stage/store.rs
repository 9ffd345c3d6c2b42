//! Filesystem-backed stage store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::{Stage, StageEvent, StageEventSink, StageFile};
use crate::error::StageError;
use crate::sync::FileLockMap;

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails — this handles
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StageError> {
    // Fast path: atomic rename
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    // Slow path: copy then remove original
    std::fs::copy(src, dst).map_err(|e| StageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Per-item outcome of a bulk delete. Item order matches the request order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDeleteReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedDelete>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDelete {
    pub path: String,
    pub reason: String,
}

/// Filesystem store holding the five stage directories under one root.
///
/// File identity within a stage is the relative path `tpa/file_name`. A
/// logical file lives in at most one stage; `move_file` relocates it under
/// the per-file lock so the single-stage invariant holds for observers.
pub struct StageStore {
    root: PathBuf,
    locks: FileLockMap,
    sink: Option<Arc<dyn StageEventSink>>,
}

impl StageStore {
    /// Creates the store and its five stage directories.
    pub fn new<P: AsRef<Path>>(root: P, locks: FileLockMap) -> Result<Self, StageError> {
        let root = root.as_ref().to_path_buf();
        for stage in Stage::ALL {
            let dir = root.join(stage.dir_name());
            std::fs::create_dir_all(&dir).map_err(|e| StageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(Self {
            root,
            locks,
            sink: None,
        })
    }

    /// Attaches the event sink notified on deletions.
    pub fn with_sink(mut self, sink: Arc<dyn StageEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.dir_name())
    }

    fn file_path(&self, stage: Stage, rel_path: &str) -> PathBuf {
        self.stage_dir(stage).join(rel_path)
    }

    /// Writes uploaded content into the SRC stage and returns its record.
    /// Overwrites any previous upload of the same file.
    pub fn put(&self, tpa: &str, file_name: &str, content: &[u8]) -> Result<StageFile, StageError> {
        let rel_path = format!("{}/{}", tpa, file_name);
        self.locks.with_lock(&rel_path, || {
            let path = self.file_path(Stage::Src, &rel_path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            std::fs::write(&path, content).map_err(|e| StageError::WriteFile {
                path: path.clone(),
                source: e,
            })?;

            log::info!("Uploaded {} to SRC stage ({} bytes)", rel_path, content.len());
            self.describe(Stage::Src, &rel_path, &path)
        })
    }

    /// Lists all files in a stage, sorted by relative path.
    pub fn list(&self, stage: Stage) -> Result<Vec<StageFile>, StageError> {
        let dir = self.stage_dir(stage);
        let mut files = Vec::new();

        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| StageError::ListStage {
                path: dir.clone(),
                source: e,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel_path = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push(self.describe(stage, &rel_path, entry.path())?);
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// True if the file currently exists in the given stage.
    pub fn exists(&self, stage: Stage, rel_path: &str) -> bool {
        self.file_path(stage, rel_path).is_file()
    }

    /// Locates the stage currently holding the file, if any.
    pub fn find(&self, rel_path: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| self.exists(*stage, rel_path))
    }

    /// Deletes one file from a stage and notifies the event sink so the
    /// queue record is reconciled in the same operation.
    pub fn delete(&self, stage: Stage, rel_path: &str) -> Result<(), StageError> {
        self.locks.with_lock(rel_path, || {
            let path = self.file_path(stage, rel_path);
            if !path.is_file() {
                return Err(StageError::NotFound {
                    stage: stage.to_string(),
                    path: rel_path.to_string(),
                });
            }
            std::fs::remove_file(&path).map_err(|e| StageError::RemoveFile {
                path: path.clone(),
                source: e,
            })?;
            log::info!("Removed {} from {} stage", rel_path, stage);
            Ok(())
        })?;

        self.notify_removed(stage, rel_path);
        Ok(())
    }

    /// Deletes several files from a stage. Each item succeeds or fails on its
    /// own; one bad path never aborts the batch. The report preserves the
    /// request order.
    pub fn bulk_delete(&self, stage: Stage, rel_paths: &[String]) -> BulkDeleteReport {
        let mut report = BulkDeleteReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for rel_path in rel_paths {
            match self.delete(stage, rel_path) {
                Ok(()) => report.succeeded.push(rel_path.clone()),
                Err(e) => {
                    log::warn!("Bulk delete failed for {}: {}", rel_path, e);
                    report.failed.push(FailedDelete {
                        path: rel_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "Bulk delete from {}: {} succeeded, {} failed",
            stage,
            report.succeeded.len(),
            report.failed.len()
        );
        report
    }

    /// Moves a file between stages. Internal to the processing pipeline; the
    /// per-file lock keeps the move atomic for concurrent observers.
    pub fn move_file(&self, rel_path: &str, from: Stage, to: Stage) -> Result<(), StageError> {
        self.locks.with_lock(rel_path, || {
            let src = self.file_path(from, rel_path);
            if !src.is_file() {
                return Err(StageError::NotFound {
                    stage: from.to_string(),
                    path: rel_path.to_string(),
                });
            }
            let dst = self.file_path(to, rel_path);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            move_file(&src, &dst)?;
            log::debug!("Moved {} from {} to {}", rel_path, from, to);
            Ok(())
        })
    }

    /// Removes every file in a stage. Returns the number removed.
    pub fn wipe(&self, stage: Stage) -> Result<u64, StageError> {
        let files = self.list(stage)?;
        let mut removed = 0u64;
        for file in files {
            let path = self.file_path(stage, &file.path);
            std::fs::remove_file(&path).map_err(|e| StageError::RemoveFile {
                path: path.clone(),
                source: e,
            })?;
            removed += 1;
        }
        log::info!("Wiped {} stage: {} files removed", stage, removed);
        Ok(removed)
    }

    fn describe(&self, stage: Stage, rel_path: &str, path: &Path) -> Result<StageFile, StageError> {
        let metadata = std::fs::metadata(path).map_err(|e| StageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let content = std::fs::read(path).map_err(|e| StageError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let digest = format!("{:x}", Sha256::digest(&content));
        let last_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(StageFile {
            stage,
            path: rel_path.to_string(),
            size_bytes: metadata.len(),
            digest,
            last_modified,
        })
    }

    fn notify_removed(&self, stage: Stage, rel_path: &str) {
        let Some(sink) = &self.sink else {
            return;
        };
        let (tpa, file_name) = match rel_path.split_once('/') {
            Some((tpa, name)) => (tpa.to_string(), name.to_string()),
            None => (String::new(), rel_path.to_string()),
        };
        sink.on_stage_event(&StageEvent::Removed {
            stage,
            tpa,
            file_name,
        });
    }
}
