//! Adaptive per-target throttle
//!
//! The throttle owns the only designed suspension point of a target worker.
//! It widens its delay bounds quickly when blocks pile up and narrows them
//! slowly once the target has been calm for a while:
//! - escalation multiplies the bounds by `escalation-factor`, up to `max-escalation`
//! - decay subtracts `decay-step` from the multiplier, never going below 1.0
//! - `consecutive-block-cap` blocks in a row signal that the target should be aborted

use crate::config::ThrottleConfig;
use crate::crawler::classifier::FailureKind;
use crate::state::ThrottleState;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the orchestrator should do after an outcome was recorded
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThrottleDecision {
    /// Bounds unchanged
    Steady,
    /// Bounds widened to the given multiplier
    Escalated { factor: f64 },
    /// Bounds narrowed to the given multiplier
    Decayed { factor: f64 },
    /// Too many consecutive blocks, give up on the target
    AbortTarget { consecutive: u32 },
}

/// Result of a throttle wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed(Duration),
    Cancelled,
}

/// Rolling block-rate throttle for one target
#[derive(Debug, Clone)]
pub struct AdaptiveThrottle {
    config: ThrottleConfig,
    state: ThrottleState,
}

impl AdaptiveThrottle {
    /// Creates a throttle at baseline
    pub fn new(config: &ThrottleConfig) -> Self {
        Self {
            config: config.clone(),
            state: ThrottleState::baseline(config.min_delay_ms, config.max_delay_ms),
        }
    }

    /// Restores a throttle from a checkpointed snapshot
    ///
    /// The multiplier is re-applied to the current configuration and clamped
    /// to its range, so a changed job file never produces bounds below baseline.
    pub fn restore(config: &ThrottleConfig, mut state: ThrottleState) -> Self {
        state.escalation = state.escalation.clamp(1.0, config.max_escalation);
        while state.window.len() > config.window_size {
            state.window.pop_front();
        }
        let mut throttle = Self {
            config: config.clone(),
            state,
        };
        throttle.apply_escalation();
        throttle
    }

    /// Returns a serializable snapshot of the current state
    pub fn snapshot(&self) -> ThrottleState {
        self.state.clone()
    }

    /// Current delay bounds with escalation applied
    pub fn bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.state.min_delay_ms),
            Duration::from_millis(self.state.max_delay_ms),
        )
    }

    pub fn escalation(&self) -> f64 {
        self.state.escalation
    }

    pub fn block_rate(&self) -> f64 {
        self.state.block_rate()
    }

    pub fn trust_score(&self) -> u32 {
        self.state.trust_score
    }

    /// Starts a new identity session with the given trust
    pub fn reset_trust(&mut self, seed: u32) {
        self.state.trust_score = seed;
    }

    /// Draws the next delay from the current bounds plus jitter
    pub fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.state.min_delay_ms..=self.state.max_delay_ms);
        let jitter = if self.config.jitter_ms > 0 {
            let scaled = (self.config.jitter_ms as f64 * self.state.escalation) as u64;
            rng.gen_range(0..=scaled)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// Suspends the caller for the next delay plus `extra`
    ///
    /// Returns [`WaitOutcome::Cancelled`] as soon as the job token fires,
    /// without waiting for the delay to run out.
    pub async fn wait(&self, extra: Duration, cancel: &CancellationToken) -> WaitOutcome {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }

        let delay = self.next_delay().saturating_add(extra);
        tracing::trace!("Waiting {:?} before next request", delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep(delay) => WaitOutcome::Elapsed(delay),
        }
    }

    /// Records the outcome of an attempt and adjusts the bounds
    ///
    /// # Arguments
    ///
    /// * `kind` - Classified outcome of the attempt
    ///
    /// # Returns
    ///
    /// The decision the orchestrator should act on. This never fails.
    pub fn record_outcome(&mut self, kind: FailureKind) -> ThrottleDecision {
        let blocked = kind.is_block();
        self.state.window.push_back(blocked);
        while self.state.window.len() > self.config.window_size {
            self.state.window.pop_front();
        }
        let rate = self.state.block_rate();

        if blocked {
            self.state.consecutive_blocks += 1;
            self.state.calm_streak = 0;
            self.state.trust_score = 0;

            let mut decision = ThrottleDecision::Steady;
            if rate > self.config.high_block_rate
                && self.state.escalation < self.config.max_escalation
            {
                let factor = (self.state.escalation * self.config.escalation_factor)
                    .min(self.config.max_escalation);
                self.state.escalation = factor;
                self.apply_escalation();
                decision = ThrottleDecision::Escalated { factor };
            }

            if self.state.consecutive_blocks >= self.config.consecutive_block_cap {
                return ThrottleDecision::AbortTarget {
                    consecutive: self.state.consecutive_blocks,
                };
            }
            return decision;
        }

        self.state.consecutive_blocks = 0;
        if kind == FailureKind::Ok {
            self.state.trust_score += 1;
        }

        if rate >= self.config.low_block_rate {
            self.state.calm_streak = 0;
            return ThrottleDecision::Steady;
        }

        self.state.calm_streak += 1;
        if self.state.calm_streak >= self.config.sustained_window && self.state.escalation > 1.0 {
            let factor = (self.state.escalation - self.config.decay_step).max(1.0);
            self.state.escalation = factor;
            self.state.calm_streak = 0;
            self.apply_escalation();
            return ThrottleDecision::Decayed { factor };
        }

        ThrottleDecision::Steady
    }

    fn apply_escalation(&mut self) {
        let factor = self.state.escalation;
        self.state.min_delay_ms = (self.config.min_delay_ms as f64 * factor).round() as u64;
        self.state.max_delay_ms = (self.config.max_delay_ms as f64 * factor).round() as u64;
    }
}
