//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `TargetState`: Lifecycle of a single crawl target (pending, fetching, blocked, exhausted, etc.)
//! - `ThrottleState`: Persistable snapshot of a target's adaptive throttle

mod target_state;
mod throttle_state;

// Re-export main types
pub use target_state::TargetState;
pub use throttle_state::ThrottleState;
