//! Crawler module: fetching, classification and job orchestration
//!
//! This module contains the runtime side of a job, including:
//! - the fetch contract and its reqwest implementation
//! - block and failure classification
//! - the per-target adaptive throttle and shared retry policy
//! - the identity pool
//! - the orchestrator that drives targets to completion

mod classifier;
mod fetcher;
mod identity;
mod orchestrator;
mod progress;
mod retry;
mod throttle;

pub use classifier::{Classifier, FailureKind, DEFAULT_CHALLENGE_MARKERS};
pub use fetcher::{
    FetchAttempt, FetchMode, FetchRequest, FetchResponse, Fetcher, HttpFetcher, TransportError,
};
pub use identity::{Identity, IdentityPool};
pub use orchestrator::{clear_job, resume_job, run_job, JobContext, JobResult, Orchestrator};
pub use progress::{ProgressHandle, ProgressSnapshot, TargetView, ATTEMPT_HISTORY};
pub use retry::RetryPolicy;
pub use throttle::{AdaptiveThrottle, ThrottleDecision, WaitOutcome};
