/// Target state definitions for tracking crawl progress
///
/// This module defines every state a crawl target can be in and the legal
/// moves between them.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current state of a target in the crawl process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    // ===== Active States =====
    /// Target is waiting for its first throttle slot
    Pending,

    /// A request for the target is in flight
    Fetching,

    /// A response is being turned into records
    Extracting,

    /// Waiting out a backoff before the next attempt
    Throttled,

    /// The last response was a rate limit or bot challenge
    Blocked,

    // ===== Terminal States =====
    /// Network errors exhausted the retry budget
    Failed,

    /// No more pages, or the page limit was reached
    Exhausted,

    /// Given up after repeated blocks or the time budget ran out
    Aborted,
}

impl TargetState {
    /// Returns true if no further work happens for the target in this run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Exhausted | Self::Aborted)
    }

    /// Returns true if the target may still make progress
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: TargetState) -> bool {
        use TargetState::*;

        // Timeouts can end any active target
        if next == Aborted && self.is_active() {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Fetching)
                | (Pending, Exhausted)
                | (Fetching, Extracting)
                | (Fetching, Throttled)
                | (Fetching, Blocked)
                | (Fetching, Failed)
                | (Extracting, Fetching)
                | (Extracting, Exhausted)
                | (Throttled, Fetching)
                | (Blocked, Throttled)
        )
    }

    /// Converts the state to the string stored in checkpoints and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Throttled => "throttled",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
            Self::Exhausted => "exhausted",
            Self::Aborted => "aborted",
        }
    }

    /// Parses a state from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        Self::all_states().into_iter().find(|state| state.as_str() == s)
    }

    /// Returns all possible target states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Pending,
            Self::Fetching,
            Self::Extracting,
            Self::Throttled,
            Self::Blocked,
            Self::Failed,
            Self::Exhausted,
            Self::Aborted,
        ]
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
