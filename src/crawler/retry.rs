//! Retry policy shared by every fetch
//!
//! Decides whether a failed attempt is retried and how long to back off.
//! Blocked responses also draw from a budget that spans the whole target.

use crate::config::RetryConfig;
use crate::crawler::classifier::FailureKind;
use std::collections::HashSet;
use std::time::Duration;

/// The single retry policy applied around every fetch
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    retry_on: HashSet<FailureKind>,
    max_identity_rotations: u32,
    max_blocked_retries: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            retry_on: config.retry_on.iter().copied().collect(),
            max_identity_rotations: config.max_identity_rotations,
            max_blocked_retries: config.max_blocked_retries,
        }
    }

    /// Returns true if another attempt is allowed after `attempts` failed ones
    pub fn should_retry(&self, kind: FailureKind, attempts: u32) -> bool {
        self.retry_on.contains(&kind) && attempts < self.max_attempts
    }

    /// Exponential backoff for the given attempt number (1-based), capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Returns true if a target that has been blocked `blocked` times so far
    /// may retry once more
    ///
    /// `attempts` counts the failed attempts of the current fetch.
    pub fn should_retry_blocked(&self, kind: FailureKind, attempts: u32, blocked: u32) -> bool {
        self.should_retry(kind, attempts) && blocked < self.max_blocked_retries
    }

    /// Delay before the next attempt, honouring a server's `Retry-After`
    ///
    /// The server's value never pushes the delay past `max-backoff-ms`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let requested = retry_after.unwrap_or_default().min(self.max_backoff);
        self.backoff(attempt).max(requested)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_identity_rotations(&self) -> u32 {
        self.max_identity_rotations
    }
}
