//! Shelfscan: the control plane of a multi-site catalog crawler
//!
//! This crate decides how fast to request listing pages without tripping
//! anti-automation defenses, persists enough state to resume interrupted jobs,
//! picks an extraction strategy per site, and merges every observation into one
//! deduplicated catalog keyed by product identity.
//!
//! The entry points are [`crawler::run_job`], [`crawler::resume_job`] and
//! [`crawler::clear_job`].

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Shelfscan operations
///
/// Only configuration, checkpoint and sink failures are fatal to a job. Fetch
/// and record level problems are counted by the orchestrator and never surface
/// here.
#[derive(Debug, Error)]
pub enum ShelfError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    CheckpointIo(#[from] storage::StorageError),

    #[error("Output sink error: {0}")]
    Sink(#[from] output::OutputError),

    #[error("No checkpoint found for job '{0}'")]
    NoCheckpoint(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::TargetState,
        to: state::TargetState,
    },
}

impl ShelfError {
    /// Returns true if the job must halt on this error
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::CheckpointIo(_) | Self::Sink(_) | Self::NoCheckpoint(_)
        )
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Target references unknown site '{0}'")]
    UnknownSite(String),

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),
}

/// Result type alias for Shelfscan operations
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{CanonicalRecord, IdentityKey, PriceChange, RawRecord};
pub use config::Config;
pub use crawler::{clear_job, resume_job, run_job, JobContext, JobResult};
pub use state::TargetState;
