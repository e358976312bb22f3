use crate::catalog::{CanonicalRecord, IdentityKey, PriceChange};
use crate::output::traits::{OutputResult, OutputSink};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Contents {
    records: BTreeMap<IdentityKey, CanonicalRecord>,
    price_changes: Vec<PriceChange>,
    flushes: usize,
}

/// In-process sink for library callers and tests
///
/// Clones share the same contents, so a caller can keep a handle while the
/// orchestrator owns the boxed sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Contents>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.lock().records.values().cloned().collect()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<CanonicalRecord> {
        self.lock().records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn price_changes(&self) -> Vec<PriceChange> {
        self.lock().price_changes.clone()
    }

    /// Number of times the sink was flushed
    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    fn lock(&self) -> MutexGuard<'_, Contents> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputSink for MemorySink {
    fn record(&mut self, record: &CanonicalRecord) -> OutputResult<()> {
        let mut contents = self.lock();
        let newer = contents
            .records
            .get(&record.key)
            .map_or(true, |existing| record.captured_at > existing.captured_at);
        if newer {
            contents.records.insert(record.key.clone(), record.clone());
        }
        Ok(())
    }

    fn price_change(&mut self, change: &PriceChange) -> OutputResult<()> {
        self.lock().price_changes.push(change.clone());
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.lock().flushes += 1;
        Ok(())
    }
}
