//! Fetch abstraction and the HTTP fetcher implementation
//!
//! This module defines the contract the orchestrator fetches through:
//! - `Fetcher`: one trait for both plain and rendering-capable back-ends
//! - `FetchRequest` / `FetchResponse`: what goes in and comes out
//! - `TransportError`: failures below the HTTP layer
//! - `FetchAttempt`: the immutable record kept for every request
//! - `HttpFetcher`: a reqwest-backed back-end without rendering

use crate::config::SiteCapabilities;
use crate::crawler::classifier::FailureKind;
use crate::crawler::identity::Identity;
use crate::extract::Strategy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// How a page should be retrieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Raw response body
    Plain,
    /// DOM after scripts ran, requires a rendering back-end
    Rendered,
}

/// A single request handed to a fetcher
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub identity: Identity,
    pub mode: FetchMode,
    pub timeout: Duration,
}

/// Raw content plus transport metadata
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// Parsed `Retry-After` header, if the server sent one
    pub retry_after: Option<Duration>,
    /// URL after redirects
    pub final_url: String,
    pub body: String,
    pub latency: Duration,
}

impl FetchResponse {
    /// Builds a 200 response, mostly useful for scripted fetchers
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_status(200, url, body)
    }

    /// Builds a response with the given status
    pub fn with_status(status: u16, url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: None,
            retry_after: None,
            final_url: url.into(),
            body: body.into(),
            latency: Duration::ZERO,
        }
    }
}

/// Failures that happen before a complete HTTP response is available
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request timeout for {0}")]
    Timeout(String),

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Failed to read body from {url}: {message}")]
    Body { url: String, message: String },

    #[error("No rendering back-end available")]
    RenderingUnavailable,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Contract for anything that can retrieve a page
///
/// Implementations must be cheap to share between target workers.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches one URL as the given identity
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;

    /// Performs low-risk interactions at the start of a session
    ///
    /// Returns the number of interactions that succeeded, which seeds the
    /// session's trust score.
    async fn warm_up(&self, _identity: &Identity, _site: &SiteCapabilities) -> u32 {
        0
    }
}

/// Immutable record of one request
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    target: String,
    url: String,
    at: DateTime<Utc>,
    kind: FailureKind,
    status: Option<u16>,
    latency_ms: u64,
    strategy: Strategy,
}

impl FetchAttempt {
    pub fn new(
        target: &str,
        url: &str,
        kind: FailureKind,
        status: Option<u16>,
        latency: Duration,
        strategy: Strategy,
    ) -> Self {
        Self {
            target: target.to_string(),
            url: url.to_string(),
            at: Utc::now(),
            kind,
            status,
            latency_ms: latency.as_millis() as u64,
            strategy,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
}

/// Non-rendering fetcher built on reqwest
///
/// Every request carries the identity's user agent and a locale-derived
/// `Accept-Language`. Rendered requests fail with
/// [`TransportError::RenderingUnavailable`] so the selector falls through.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a fetcher with a shared connection pool
    ///
    /// # Returns
    ///
    /// * `Ok(HttpFetcher)` - Successfully built client
    /// * `Err(reqwest::Error)` - TLS backend or client setup failed
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        if request.mode == FetchMode::Rendered {
            return Err(TransportError::RenderingUnavailable);
        }

        let started = Instant::now();
        let response = self
            .client
            .get(&request.url)
            .header(USER_AGENT, &request.identity.user_agent)
            .header(ACCEPT_LANGUAGE, accept_language(&request.identity.locale))
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8",
            )
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| TransportError::Body {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        Ok(FetchResponse {
            status,
            content_type,
            retry_after,
            final_url,
            body,
            latency: started.elapsed(),
        })
    }

    /// Visits the site's home page once so later requests carry a history
    async fn warm_up(&self, identity: &Identity, site: &SiteCapabilities) -> u32 {
        let Some(template) = site.page_url.as_ref().or(site.endpoint_url.as_ref()) else {
            return 0;
        };
        let Ok(mut home) = Url::parse(&site.expand(template, "", 0)) else {
            return 0;
        };
        home.set_path("/");
        home.set_query(None);

        let request = FetchRequest {
            url: home.to_string(),
            identity: identity.clone(),
            mode: FetchMode::Plain,
            timeout: Duration::from_secs(30),
        };
        match self.fetch(&request).await {
            Ok(response) if (200..300).contains(&response.status) => 1,
            Ok(response) => {
                tracing::debug!("Warm-up for {} returned HTTP {}", site.key, response.status);
                0
            }
            Err(e) => {
                tracing::debug!("Warm-up for {} failed: {}", site.key, e);
                0
            }
        }
    }
}

/// Maps a reqwest failure to a transport error
fn transport_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(url.to_string())
    } else if error.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        TransportError::Other(error.to_string())
    }
}

/// Builds an Accept-Language value such as `en-CA,en;q=0.9`
fn accept_language(locale: &str) -> String {
    match locale.split_once('-') {
        Some((language, _)) => format!("{},{};q=0.9", locale, language),
        None => locale.to_string(),
    }
}
