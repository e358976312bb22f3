//! Extraction module: turning fetched content into raw records
//!
//! # Components
//!
//! - `endpoint`: JSON search/listing APIs
//! - `embedded`: `__NEXT_DATA__` and JSON-LD inside listing pages
//! - `rendered`: product tiles in a rendered DOM
//! - `fields`: shared field mapping from loosely shaped JSON
//! - `selector`: strategy ordering and fallback

pub mod embedded;
pub mod endpoint;
pub mod fields;
pub mod rendered;
mod selector;

pub use selector::{Content, ContentSource, Extraction, Strategy, StrategySelector};

use crate::catalog::RawRecord;
use crate::config::{Config, SiteCapabilities};
use std::collections::HashMap;
use std::sync::Arc;

/// Records pulled from one body, plus whatever the body says about more pages
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub records: Vec<RawRecord>,
    /// `Some(false)` when the source says this was the last page
    pub has_more: Option<bool>,
}

/// Site capabilities by site key
#[derive(Debug, Clone, Default)]
pub struct SiteRegistry {
    sites: HashMap<String, Arc<SiteCapabilities>>,
}

impl SiteRegistry {
    pub fn from_config(config: &Config) -> Self {
        let sites = config
            .sites
            .iter()
            .map(|site| (site.key.clone(), Arc::new(site.clone())))
            .collect();
        Self { sites }
    }

    pub fn get(&self, key: &str) -> Option<Arc<SiteCapabilities>> {
        self.sites.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}
