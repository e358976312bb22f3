//! Storage module for crash-safe job progress
//!
//! This module handles everything a resumed job needs to continue exactly
//! where the previous run stopped:
//! - The checkpoint document (`CheckpointState`) and its parts
//! - The seen identity-key set used by the merge engine
//! - The `CheckpointStore` trait and its file-backed implementation
//! - The SQLite schema used by the catalog sink

mod checkpoint;
pub mod schema;
mod traits;

pub use checkpoint::FileCheckpointStore;
pub use traits::{CheckpointStore, StorageError, StorageResult};

use crate::catalog::IdentityKey;
use crate::state::{TargetState, ThrottleState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the checkpoint document layout
pub const CHECKPOINT_VERSION: u32 = 1;

/// What the merge engine remembers about a key it has already emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenEntry {
    pub captured_at: DateTime<Utc>,
    pub price_cents: Option<i64>,
}

/// Set of identity keys already merged into the catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet(BTreeMap<IdentityKey, SeenEntry>);

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` was emitted with the given capture time and price
    pub fn mark_seen(&mut self, key: IdentityKey, entry: SeenEntry) {
        self.0.insert(key, entry);
    }

    pub fn is_seen(&self, key: &IdentityKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&SeenEntry> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.0.keys()
    }
}

/// Aggregate outcome counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Records inserted under a new identity key
    pub scraped: u64,
    /// Observations of keys that were already in the catalog
    pub duplicates: u64,
    /// Rejected records and failed fetches
    pub errors: u64,
    /// Fetches answered with a rate limit or challenge
    pub blocked: u64,
    pub price_changes: u64,
    pub pages: u64,
}

impl Counters {
    pub fn add(&mut self, other: &Counters) {
        self.scraped += other.scraped;
        self.duplicates += other.duplicates;
        self.errors += other.errors;
        self.blocked += other.blocked;
        self.price_changes += other.price_changes;
        self.pages += other.pages;
    }
}

/// Pagination progress of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetProgress {
    /// Zero-based index of the next page to fetch
    pub next_page: u32,
    pub state: TargetState,
    pub pages_done: u32,
    pub records_seen: u64,
    /// Set when every strategy came back empty on the first page
    #[serde(default)]
    pub needs_review: bool,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Default for TargetProgress {
    fn default() -> Self {
        Self {
            next_page: 0,
            state: TargetState::Pending,
            pages_done: 0,
            records_seen: 0,
            needs_review: false,
            last_error: None,
        }
    }
}

/// The persisted checkpoint document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub version: u32,
    pub job_id: String,
    pub config_hash: String,
    pub targets: BTreeMap<String, TargetProgress>,
    pub seen: SeenSet,
    pub counters: Counters,
    #[serde(default)]
    pub throttle: BTreeMap<String, ThrottleState>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl CheckpointState {
    /// Creates an empty checkpoint for a job
    pub fn new(job_id: &str, config_hash: &str) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            job_id: job_id.to_string(),
            config_hash: config_hash.to_string(),
            targets: BTreeMap::new(),
            seen: SeenSet::new(),
            counters: Counters::default(),
            throttle: BTreeMap::new(),
            saved_at: None,
        }
    }

    pub fn mark_seen(&mut self, key: IdentityKey, entry: SeenEntry) {
        self.seen.mark_seen(key, entry);
    }

    pub fn is_seen(&self, key: &IdentityKey) -> bool {
        self.seen.is_seen(key)
    }

    /// Progress for a target, created on first access
    pub fn target_mut(&mut self, target_id: &str) -> &mut TargetProgress {
        self.targets.entry(target_id.to_string()).or_default()
    }

    /// Returns true if a target already reached a terminal state
    pub fn is_finished(&self, target_id: &str) -> bool {
        self.targets
            .get(target_id)
            .is_some_and(|t| t.state.is_terminal())
    }
}
