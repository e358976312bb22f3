//! Extraction strategy ordering and fallback
//!
//! A site declares which acquisition paths it supports; the selector walks
//! them from most to least precise and stops at the first one that yields
//! records.

use crate::catalog::RawRecord;
use crate::config::SiteCapabilities;
use crate::crawler::FetchMode;
use crate::extract::{embedded, endpoint, rendered, ExtractedPage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A way of getting product data out of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// A JSON search/listing API
    StructuredEndpoint,
    /// JSON embedded in the listing page markup
    EmbeddedData,
    /// Product tiles read from a fully rendered page
    RenderedPage,
}

impl Strategy {
    /// Precision order, best first
    pub const ORDER: [Strategy; 3] = [
        Strategy::StructuredEndpoint,
        Strategy::EmbeddedData,
        Strategy::RenderedPage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::StructuredEndpoint => "structured-endpoint",
            Strategy::EmbeddedData => "embedded-data",
            Strategy::RenderedPage => "rendered-page",
        }
    }

    /// How the content for this strategy has to be fetched
    pub fn fetch_mode(&self) -> FetchMode {
        match self {
            Strategy::RenderedPage => FetchMode::Rendered,
            _ => FetchMode::Plain,
        }
    }

    /// The URL template this strategy loads from
    pub fn template<'a>(&self, site: &'a SiteCapabilities) -> Option<&'a str> {
        match self {
            Strategy::StructuredEndpoint => site.endpoint_url.as_deref(),
            Strategy::EmbeddedData | Strategy::RenderedPage => site.page_url.as_deref(),
        }
    }

    /// Runs this strategy's extractor over a fetched body
    pub fn extract(&self, body: &str, url: &str, site: &SiteCapabilities) -> ExtractedPage {
        match self {
            Strategy::StructuredEndpoint => endpoint::extract_endpoint(body, site),
            Strategy::EmbeddedData => embedded::extract_embedded(body),
            Strategy::RenderedPage => rendered::extract_rendered(body, url, site),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fetched content handed to an extractor
#[derive(Debug, Clone)]
pub struct Content {
    pub body: String,
    pub url: String,
}

/// Supplies content for a strategy
///
/// `Ok(None)` means the strategy could not be served for this page (for
/// example rendering is unavailable) and the selector should move on. An
/// `Err` stops the walk and is handed back to the caller.
#[async_trait]
pub trait ContentSource: Send {
    type Error: Send;

    async fn load(&mut self, strategy: Strategy) -> Result<Option<Content>, Self::Error>;
}

/// What one page's extraction produced
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    /// The strategy that produced the records, if any did
    pub strategy: Option<Strategy>,
    pub has_more: Option<bool>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Chooses extraction strategies for one site
#[derive(Debug, Clone)]
pub struct StrategySelector {
    site: SiteCapabilities,
    strategies: Vec<Strategy>,
}

impl StrategySelector {
    /// Builds the ordered strategy list from the site's capabilities
    pub fn for_site(site: &SiteCapabilities) -> Self {
        let strategies = Strategy::ORDER
            .into_iter()
            .filter(|strategy| match strategy {
                Strategy::StructuredEndpoint => site.endpoint_url.is_some(),
                Strategy::EmbeddedData => site.page_url.is_some() && site.embedded_data,
                Strategy::RenderedPage => site.page_url.is_some() && site.rendering,
            })
            .collect();

        Self {
            site: site.clone(),
            strategies,
        }
    }

    pub fn strategies(&self) -> &[Strategy] {
        &self.strategies
    }

    /// Tries each strategy in order until one yields records
    ///
    /// # Returns
    ///
    /// The first non-empty extraction, or an empty one when every strategy
    /// came back empty.
    pub async fn extract<S: ContentSource>(&self, source: &mut S) -> Result<Extraction, S::Error> {
        let mut has_more = None;

        for &strategy in &self.strategies {
            let content = match source.load(strategy).await? {
                Some(content) => content,
                None => {
                    tracing::debug!("{}: {} unavailable, trying next", self.site.key, strategy);
                    continue;
                }
            };

            let page = strategy.extract(&content.body, &content.url, &self.site);
            if !page.records.is_empty() {
                tracing::debug!(
                    "{}: {} extracted {} records",
                    self.site.key,
                    strategy,
                    page.records.len()
                );
                return Ok(Extraction {
                    records: page.records,
                    strategy: Some(strategy),
                    has_more: page.has_more,
                });
            }

            tracing::debug!("{}: {} came back empty", self.site.key, strategy);
            has_more = has_more.or(page.has_more);
        }

        Ok(Extraction {
            records: Vec::new(),
            strategy: None,
            has_more,
        })
    }
}
