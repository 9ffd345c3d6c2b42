pub mod config;
pub mod coordinator;
pub mod datastore;
pub mod db;
pub mod error;
pub mod mapping;
pub mod queue;
pub mod stage;
pub mod sync;
pub mod tasks;

pub use config::Settings;
pub use coordinator::{ClearAllReport, PipelineCoordinator, TableCompleteness, TpaStats};
pub use datastore::{DataStore, DataStoreError, NullDataStore};
pub use error::{MappingError, QueueError, Result, StageError, StagepipeError, TaskError};
pub use mapping::{
    FieldMapping, GenerateParams, GenerateReport, MappingMethod, MappingModel, MappingReconciler,
};
pub use queue::{DeleteFileDataReport, QueueEntry, QueueFilter, QueueLedger, QueueStatus};
pub use stage::{Stage, StageFile, StageStore};
pub use sync::FileLockMap;
pub use tasks::{SchedulerBackend, TaskGraph, TaskLayer, TaskNode, TaskState};
