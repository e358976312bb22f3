//! Human-readable job summaries
//!
//! This module prints the outcome of a run and the progress stored in a
//! checkpoint.

use crate::crawler::JobResult;
use crate::state::TargetState;
use crate::storage::CheckpointState;
use std::collections::BTreeMap;

/// Prints a job result to stdout
///
/// # Arguments
///
/// * `result` - The result returned by the orchestrator
pub fn print_summary(result: &JobResult) {
    println!("=== Job Summary: {} ===\n", result.job_id);

    if result.resumed {
        println!("Resumed from checkpoint");
    }
    if result.cancelled {
        println!("Interrupted before completion, resume to continue");
    }
    println!();

    println!("Records:");
    println!("  New: {}", result.scraped);
    println!("  Repeated: {}", result.duplicates);
    println!("  Price changes: {}", result.price_changes);
    println!("  Pages: {}", result.pages);
    println!();

    println!("Problems:");
    println!("  Errors: {}", result.errors);
    println!("  Blocked responses: {}", result.blocked);
    println!();

    print_targets("Exhausted targets", &result.exhausted_targets);
    print_targets("Aborted targets", &result.aborted_targets);
    print_targets("Failed targets", &result.failed_targets);
    print_targets("Targets flagged for review", &result.flagged_targets);
}

fn print_targets(title: &str, targets: &[String]) {
    if targets.is_empty() {
        return;
    }
    println!("{} ({}):", title, targets.len());
    for target in targets {
        println!("  - {}", target);
    }
    println!();
}

/// Counts targets per state, in state order
pub fn targets_by_state(checkpoint: &CheckpointState) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for state in TargetState::all_states() {
        let count = checkpoint
            .targets
            .values()
            .filter(|t| t.state == state)
            .count();
        if count > 0 {
            counts.insert(state.as_str(), count);
        }
    }
    counts
}

/// Prints the progress recorded in a checkpoint
///
/// # Arguments
///
/// * `checkpoint` - A loaded checkpoint
pub fn print_checkpoint_status(checkpoint: &CheckpointState) {
    println!("=== Checkpoint: {} ===\n", checkpoint.job_id);

    match checkpoint.saved_at {
        Some(at) => println!("Last saved: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last saved: never"),
    }
    println!("Known products: {}", checkpoint.seen.len());
    println!();

    let counters = &checkpoint.counters;
    println!("Totals:");
    println!("  Scraped: {}", counters.scraped);
    println!("  Repeated: {}", counters.duplicates);
    println!("  Errors: {}", counters.errors);
    println!("  Blocked: {}", counters.blocked);
    println!("  Price changes: {}", counters.price_changes);
    println!("  Pages: {}", counters.pages);
    println!();

    println!("Targets by state:");
    for (state, count) in targets_by_state(checkpoint) {
        println!("  {}: {}", state, count);
    }
    println!();

    println!("Targets:");
    for (id, progress) in &checkpoint.targets {
        let review = if progress.needs_review { " [review]" } else { "" };
        println!(
            "  {} - {} (pages: {}, records: {}){}",
            id, progress.state, progress.pages_done, progress.records_seen, review
        );
        if let Some(error) = &progress.last_error {
            println!("      last error: {}", error);
        }
    }
}
