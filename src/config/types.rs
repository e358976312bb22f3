use crate::crawler::FailureKind;
use serde::Deserialize;

/// Main configuration structure for a crawl job
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub job: JobConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteCapabilities>,
    #[serde(default, rename = "target")]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Looks up the capability descriptor for a site key
    pub fn site(&self, key: &str) -> Option<&SiteCapabilities> {
        self.sites.iter().find(|s| s.key == key)
    }
}

/// Job-level settings
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Stable job identifier, also the checkpoint file stem
    pub id: String,

    /// Directory holding checkpoint documents
    #[serde(rename = "checkpoint-dir", default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    /// Number of merged records between checkpoint flushes
    #[serde(rename = "checkpoint-batch-size", default = "default_batch_size")]
    pub checkpoint_batch_size: usize,

    /// Maximum number of targets worked on at the same time
    #[serde(rename = "max-concurrent-targets", default = "default_concurrent_targets")]
    pub max_concurrent_targets: usize,

    /// Page limit for targets that do not set their own
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Transport timeout for a single fetch attempt (seconds)
    #[serde(rename = "fetch-timeout-secs", default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Wall-clock budget for one target (seconds)
    #[serde(rename = "target-timeout-secs", default = "default_target_timeout")]
    pub target_timeout_secs: u64,
}

/// Adaptive throttle tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the uniform jitter added to every wait
    #[serde(rename = "jitter-ms")]
    pub jitter_ms: u64,

    /// Number of trailing attempts the block rate is computed over
    #[serde(rename = "window-size")]
    pub window_size: usize,

    #[serde(rename = "high-block-rate")]
    pub high_block_rate: f64,

    #[serde(rename = "low-block-rate")]
    pub low_block_rate: f64,

    /// Multiplier applied to the delay bounds on escalation
    #[serde(rename = "escalation-factor")]
    pub escalation_factor: f64,

    /// Hard cap on the accumulated escalation multiplier
    #[serde(rename = "max-escalation")]
    pub max_escalation: f64,

    /// Amount the multiplier shrinks by after a calm window
    #[serde(rename = "decay-step")]
    pub decay_step: f64,

    /// Consecutive calm outcomes required before one decay step
    #[serde(rename = "sustained-window")]
    pub sustained_window: u32,

    #[serde(rename = "consecutive-block-cap")]
    pub consecutive_block_cap: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2_000,
            max_delay_ms: 5_000,
            jitter_ms: 500,
            window_size: 10,
            high_block_rate: 0.3,
            low_block_rate: 0.1,
            escalation_factor: 2.0,
            max_escalation: 16.0,
            decay_step: 0.5,
            sustained_window: 10,
            consecutive_block_cap: 5,
        }
    }
}

/// Retry policy applied around every fetch
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-backoff-ms")]
    pub base_backoff_ms: u64,

    #[serde(rename = "max-backoff-ms")]
    pub max_backoff_ms: u64,

    /// Failure kinds that are retried
    #[serde(rename = "retry-on")]
    pub retry_on: Vec<FailureKind>,

    /// Identity rotations allowed per target before it is aborted
    #[serde(rename = "max-identity-rotations")]
    pub max_identity_rotations: u32,

    /// Blocked responses a target may retry over its whole run
    #[serde(rename = "max-blocked-retries")]
    pub max_blocked_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 2_000,
            max_backoff_ms: 300_000,
            retry_on: vec![
                FailureKind::NetworkError,
                FailureKind::RateLimited,
                FailureKind::BotChallenge,
            ],
            max_identity_rotations: 2,
            max_blocked_retries: 10,
        }
    }
}

/// How the identity pool picks the next profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationMode {
    #[default]
    RoundRobin,
    Random,
}

/// Identity pool configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub rotation: RotationMode,

    /// Cool-down applied to an identity after its session was aborted (seconds)
    #[serde(rename = "cooldown-secs", default = "default_cooldown")]
    pub cooldown_secs: u64,

    #[serde(default, rename = "profile")]
    pub profiles: Vec<IdentityProfile>,
}

/// One client-presentation profile
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProfile {
    pub name: String,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "viewport-width", default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(rename = "viewport-height", default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite catalog database
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./catalog.db".to_string(),
        }
    }
}

/// Static per-site capability descriptor
///
/// Declares which extraction strategies apply to a site and the parameters
/// they need. URL templates accept `{query}` (form-encoded) and `{page}`.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteCapabilities {
    /// Short site key used in identity keys and target definitions
    pub key: String,

    /// Store or banner identifier recorded with every observation
    pub store: String,

    #[serde(default = "default_currency")]
    pub currency: String,

    /// Listing page template used by the embedded-data and rendered strategies
    #[serde(rename = "page-url")]
    pub page_url: Option<String>,

    /// Machine-readable endpoint template
    #[serde(rename = "endpoint-url")]
    pub endpoint_url: Option<String>,

    /// Dotted path to the record array inside endpoint payloads
    #[serde(rename = "records-path")]
    pub records_path: Option<String>,

    /// Number substituted for `{page}` on the first page
    #[serde(rename = "first-page", default = "default_first_page")]
    pub first_page: u32,

    /// Whether listing pages embed structured product data
    #[serde(rename = "embedded-data", default = "default_true")]
    pub embedded_data: bool,

    /// Whether the rendering back-end may be used for this site
    #[serde(default)]
    pub rendering: bool,

    /// Run the fetcher's warm-up procedure at the start of every session
    #[serde(default)]
    pub warmup: bool,

    /// CSS selector for product tiles in rendered pages
    #[serde(rename = "tile-selector")]
    pub tile_selector: Option<String>,

    /// Extra payload markers that indicate a bot challenge
    #[serde(rename = "challenge-markers", default)]
    pub challenge_markers: Vec<String>,
}

impl SiteCapabilities {
    /// Expands a URL template for a query and zero-based page index
    pub fn expand(&self, template: &str, query: &str, page_index: u32) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        template
            .replace("{query}", &encoded)
            .replace("{page}", &(page_index + self.first_page).to_string())
    }
}

/// One crawl target from the job file
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub site: String,
    pub query: String,

    #[serde(rename = "max-pages")]
    pub max_pages: Option<u32>,

    /// Overrides the site's store for regional pricing
    pub store: Option<String>,
}

impl TargetConfig {
    /// Stable id used in checkpoints and logs, e.g. `freshmart:milk`
    pub fn id(&self) -> String {
        format!("{}:{}", self.site, self.query)
    }
}

fn default_checkpoint_dir() -> String {
    "./checkpoints".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_concurrent_targets() -> usize {
    4
}

fn default_max_pages() -> u32 {
    10
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_target_timeout() -> u64 {
    1_800
}

fn default_cooldown() -> u64 {
    300
}

fn default_viewport_width() -> u32 {
    1920
}

fn default_viewport_height() -> u32 {
    1080
}

fn default_locale() -> String {
    "en-CA".to_string()
}

fn default_timezone() -> String {
    "America/Edmonton".to_string()
}

fn default_currency() -> String {
    "CAD".to_string()
}

fn default_first_page() -> u32 {
    1
}

fn default_true() -> bool {
    true
}
