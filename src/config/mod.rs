//! Configuration module for Shelfscan
//!
//! This module handles loading, parsing, and validating TOML job files.
//!
//! # Example
//!
//! ```no_run
//! use shelfscan::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("job.toml")).unwrap();
//! println!("Crawling {} targets", config.targets.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, IdentityConfig, IdentityProfile, JobConfig, OutputConfig, RetryConfig,
    RotationMode, SiteCapabilities, TargetConfig, ThrottleConfig,
};

// Re-export parser functions
pub use parser::{
    compute_config_hash, hash_content, load_config, load_config_with_hash, parse_config,
};
