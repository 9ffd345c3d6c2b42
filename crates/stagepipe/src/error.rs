use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagepipeError {
    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("File '{path}' not found in {stage} stage")]
    NotFound { stage: String, path: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read stage directory '{path}': {source}")]
    ListStage {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue entry {queue_id} not found")]
    NotFound { queue_id: i64 },

    #[error("No queue entry for file '{file_name}' (tpa '{tpa}')")]
    FileNotFound { file_name: String, tpa: String },

    #[error("File '{file_name}' (tpa '{tpa}') already has an active entry with status {status}")]
    DuplicateActive {
        file_name: String,
        tpa: String,
        status: String,
    },

    #[error("Invalid transition from {from} to {to} for queue entry {queue_id}")]
    InvalidTransition {
        queue_id: i64,
        from: String,
        to: String,
    },

    #[error("Invalid state {status} for queue entry {queue_id}: {reason}")]
    InvalidState {
        queue_id: i64,
        status: String,
        reason: String,
    },

    #[error("Data store error: {0}")]
    External(String),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task '{name}' not found in {layer} layer")]
    NotFound { layer: String, name: String },

    #[error("Task '{name}' is controlled by predecessor '{predecessor}' and cannot be commanded directly")]
    PredecessorControlled { name: String, predecessor: String },

    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("Invalid state for task '{name}': {reason}")]
    InvalidState { name: String, reason: String },

    #[error("Scheduler backend error: {0}")]
    External(String),
}

#[derive(Error, Debug)]
pub enum MappingError {
    #[error("Mapping {mapping_id} not found")]
    NotFound { mapping_id: i64 },

    #[error("No source fields available for source table '{source_table}' (tpa '{tpa}')")]
    NoSourceData { source_table: String, tpa: String },

    #[error("Confidence {value} out of range 0.0 to 1.0")]
    InvalidConfidence { value: f64 },

    #[error("Method {method} cannot generate candidates")]
    InvalidMethod { method: String },

    #[error("Model collaborator error: {0}")]
    External(String),

    #[error("Model collaborator timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, StagepipeError>;
