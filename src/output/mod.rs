//! Output module: where canonical records go
//!
//! This module handles:
//! - The `OutputSink` contract the orchestrator writes through
//! - A SQLite catalog and an in-memory sink
//! - Printing job summaries and checkpoint status

mod memory;
mod sqlite_output;
pub mod stats;
mod traits;

pub use memory::MemorySink;
pub use sqlite_output::SqliteSink;
pub use stats::{print_checkpoint_status, print_summary};
pub use traits::{OutputError, OutputResult, OutputSink};
