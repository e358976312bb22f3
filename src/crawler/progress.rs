//! Live progress of a running job
//!
//! Workers publish into a shared snapshot; callers read a copy at any time
//! without touching the merge lock.

use crate::crawler::fetcher::FetchAttempt;
use crate::crawler::throttle::AdaptiveThrottle;
use crate::state::TargetState;
use crate::storage::Counters;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Number of recent attempts kept per target
pub const ATTEMPT_HISTORY: usize = 20;

/// Point-in-time view of one target
#[derive(Debug, Clone, Serialize)]
pub struct TargetView {
    pub state: TargetState,
    /// Zero-based index of the page being worked on
    pub page: u32,
    pub pages_done: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub escalation: f64,
    pub block_rate: f64,
    pub trust_score: u32,
    pub identity: Option<String>,
    pub recent: VecDeque<FetchAttempt>,
}

impl Default for TargetView {
    fn default() -> Self {
        Self {
            state: TargetState::Pending,
            page: 0,
            pages_done: 0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            escalation: 1.0,
            block_rate: 0.0,
            trust_score: 0,
            identity: None,
            recent: VecDeque::new(),
        }
    }
}

/// Counts and per-target views of a job
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: String,
    /// Counters of the current run
    pub counters: Counters,
    pub targets: BTreeMap<String, TargetView>,
}

impl ProgressSnapshot {
    /// Number of targets in the given state
    pub fn count_in(&self, state: TargetState) -> usize {
        self.targets.values().filter(|t| t.state == state).count()
    }
}

/// Cloneable handle to a job's progress
#[derive(Debug, Clone, Default)]
pub struct ProgressHandle {
    inner: Arc<Mutex<ProgressSnapshot>>,
}

impl ProgressHandle {
    pub fn new(job_id: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProgressSnapshot {
                job_id: job_id.to_string(),
                ..ProgressSnapshot::default()
            })),
        }
    }

    /// Returns a copy of the current progress
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().clone()
    }

    pub(crate) fn set_counters(&self, counters: Counters) {
        self.lock().counters = counters;
    }

    pub(crate) fn update<F>(&self, target: &str, f: F)
    where
        F: FnOnce(&mut TargetView),
    {
        let mut snapshot = self.lock();
        f(snapshot.targets.entry(target.to_string()).or_default());
    }

    pub(crate) fn set_state(&self, target: &str, state: TargetState) {
        self.update(target, |view| view.state = state);
    }

    pub(crate) fn set_throttle(&self, target: &str, throttle: &AdaptiveThrottle) {
        let (min_delay, max_delay) = throttle.bounds();
        self.update(target, |view| {
            view.min_delay = min_delay;
            view.max_delay = max_delay;
            view.escalation = throttle.escalation();
            view.block_rate = throttle.block_rate();
            view.trust_score = throttle.trust_score();
        });
    }

    pub(crate) fn record_attempt(&self, target: &str, attempt: FetchAttempt) {
        self.update(target, |view| {
            view.recent.push_back(attempt);
            while view.recent.len() > ATTEMPT_HISTORY {
                view.recent.pop_front();
            }
        });
    }

    // A panicking worker must not take the progress view down with it
    fn lock(&self) -> MutexGuard<'_, ProgressSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
