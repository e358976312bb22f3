//! Checkpoint store trait and error types

use crate::storage::CheckpointState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while persisting or loading checkpoints
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt checkpoint at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Checkpoint belongs to job '{found}', expected '{expected}'")]
    JobMismatch { found: String, expected: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable home of a job's checkpoint
///
/// Implementations must make `save` atomic: a crash while saving leaves the
/// previous good checkpoint in place.
pub trait CheckpointStore: Send + Sync {
    /// Loads the checkpoint for a job, or None if the job never saved one
    fn load(&self, job_id: &str) -> StorageResult<Option<CheckpointState>>;

    /// Replaces the stored checkpoint with `state`
    fn save(&self, state: &CheckpointState) -> StorageResult<()>;

    /// Removes the checkpoint for a job
    ///
    /// Returns true if a checkpoint existed. This is an operator action and is
    /// never called by the orchestrator on its own.
    fn clear(&self, job_id: &str) -> StorageResult<bool>;
}
