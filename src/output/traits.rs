//! Output sink trait and error types
//!
//! A sink is the append-only durable stream canonical records end up in.
//! The orchestrator never picks a file format; it only calls the sink.

use crate::catalog::{CanonicalRecord, PriceChange};
use thiserror::Error;

/// Errors that can occur while writing output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write output: {0}")]
    Write(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for canonical records and price drift events
///
/// Records for a key that was already written supersede the earlier one.
/// Sink failures are fatal to the job.
pub trait OutputSink: Send {
    /// Writes a new or superseding record
    fn record(&mut self, record: &CanonicalRecord) -> OutputResult<()>;

    /// Appends a price change event
    fn price_change(&mut self, change: &PriceChange) -> OutputResult<()>;

    /// Makes everything written so far durable
    ///
    /// Called before every checkpoint save, so a checkpoint never claims
    /// records the sink lost.
    fn flush(&mut self) -> OutputResult<()> {
        Ok(())
    }
}
