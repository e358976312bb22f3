use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Serializable snapshot of one target's adaptive throttle
///
/// This is what the checkpoint persists so a resumed target keeps the delay
/// bounds it had earned instead of starting from baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleState {
    /// Current lower delay bound (milliseconds, escalation applied)
    pub min_delay_ms: u64,

    /// Current upper delay bound (milliseconds, escalation applied)
    pub max_delay_ms: u64,

    /// Multiplier applied to the configured bounds, always >= 1.0
    pub escalation: f64,

    /// Trailing outcomes, `true` for a blocked attempt
    pub window: VecDeque<bool>,

    /// Blocks since the last non-blocked outcome
    pub consecutive_blocks: u32,

    /// Calm outcomes since the last escalation or decay
    pub calm_streak: u32,

    /// Successful requests in the current identity session
    pub trust_score: u32,
}

impl ThrottleState {
    /// Creates a state at baseline for the given bounds
    pub fn baseline(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms,
            max_delay_ms,
            escalation: 1.0,
            window: VecDeque::new(),
            consecutive_blocks: 0,
            calm_streak: 0,
            trust_score: 0,
        }
    }

    /// Fraction of blocked attempts in the trailing window
    pub fn block_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let blocked = self.window.iter().filter(|b| **b).count();
        blocked as f64 / self.window.len() as f64
    }
}
